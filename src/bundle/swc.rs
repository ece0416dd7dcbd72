use anyhow::{Context, anyhow};
use swc_core::common::comments::SingleThreadedComments;
use swc_core::common::sync::Lrc;
use swc_core::common::{FileName, GLOBALS, Globals, Mark, SourceMap, Spanned};
use swc_core::ecma::ast::{EsVersion, Pass, Program};
use swc_core::ecma::codegen::to_code_default;
use swc_core::ecma::parser::{EsSyntax, Syntax, parse_file_as_script};
use swc_core::ecma::preset_env::{self, transform_from_env};
use swc_core::ecma::transforms::base::assumptions::Assumptions;
use swc_core::ecma::transforms::base::fixer::fixer;
use swc_core::ecma::transforms::base::helpers::{HELPERS, Helpers, inject_helpers};
use swc_core::ecma::transforms::base::hygiene::hygiene;
use swc_core::ecma::transforms::base::resolver;

use super::baseline::Baseline;
use crate::toolchain::Transpiler;

/// In-process syntax lowering with swc's preset-env.
///
/// The input is a bundled script, module syntax is a parse error. Helpers
/// are inlined so the output stays one self-contained unit, and no
/// polyfills are injected.
#[derive(Debug, Default, Clone, Copy)]
pub struct Swc;

impl Transpiler for Swc {
    fn transpile(&self, source: &str, baseline: &Baseline) -> anyhow::Result<String> {
        let env: preset_env::Config = serde_json::from_value(serde_json::json!({
            "targets": baseline.browserslist(),
        }))
        .context("Invalid preset-env configuration")?;

        let cm: Lrc<SourceMap> = Default::default();
        let fm = cm.new_source_file(FileName::Anon.into(), source.to_owned());

        GLOBALS.set(&Globals::new(), || -> anyhow::Result<String> {
            let mut recovered = Vec::new();
            let script = parse_file_as_script(
                &fm,
                Syntax::Es(EsSyntax::default()),
                EsVersion::EsNext,
                None,
                &mut recovered,
            )
            .map_err(|e| {
                let line = cm.lookup_char_pos(e.span().lo).line;
                anyhow!("Syntax error on line {line}: {}", e.kind().msg())
            })?;

            if let Some(e) = recovered.first() {
                let line = cm.lookup_char_pos(e.span().lo).line;
                anyhow::bail!("Syntax error on line {line}: {}", e.kind().msg());
            }

            let unresolved_mark = Mark::new();
            let top_level_mark = Mark::new();
            let mut program = Program::Script(script);

            HELPERS.set(&Helpers::new(false), || {
                let mut passes = (
                    resolver(unresolved_mark, top_level_mark, false),
                    transform_from_env(
                        unresolved_mark,
                        None::<SingleThreadedComments>,
                        env.into(),
                        Assumptions::default(),
                    ),
                    inject_helpers(unresolved_mark),
                    hygiene(),
                    fixer(None),
                );

                passes.process(&mut program);
            });

            Ok(to_code_default(cm.clone(), None, &program))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chrome(version: u32) -> Baseline {
        format!("chrome{version}").parse().unwrap()
    }

    #[test]
    fn lowers_arrows_classes_and_block_scope() {
        let code = Swc
            .transpile("const f = () => 1;\nclass A {}\nlet a = new A();\n", &chrome(41))
            .unwrap();

        assert!(!code.contains("=>"));
        assert!(!code.contains("class A"));
        assert!(!code.contains("const "));
        assert!(!code.contains("let "));
        assert!(code.contains("function"));
    }

    #[test]
    fn lowers_the_bundle_wrapper() {
        let code = Swc
            .transpile("(() => {\n  var f = function () { return 1; };\n})();\n", &chrome(41))
            .unwrap();

        assert!(!code.contains("=>"));
        assert!(code.contains("return 1"));
    }

    #[test]
    fn keeps_what_the_baseline_supports() {
        let code = Swc.transpile("var f = (a) => a ** 2;\n", &chrome(52)).unwrap();
        assert!(code.contains("=>"));
        assert!(code.contains("**"));

        let code = Swc.transpile("var f = (a) => a ** 2;\n", &chrome(51)).unwrap();
        assert!(code.contains("=>"));
        assert!(!code.contains("**"));
    }

    #[test]
    fn regex_after_parenthesis_survives() {
        let code = Swc
            .transpile("var s = '//';\nif (s) /\\/\\//.test(s);\n", &chrome(41))
            .unwrap();

        assert!(code.contains(r"/\/\//.test(s)"));
    }

    #[test]
    fn syntax_error_names_the_line() {
        let err = Swc.transpile("var a = 1;\nvar = ;\n", &chrome(41)).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn module_syntax_is_rejected() {
        assert!(Swc.transpile("export var a = 1;\n", &chrome(41)).is_err());
    }
}
