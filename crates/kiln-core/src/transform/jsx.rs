//! JSX adapter shared by the React, Preact and Solid families.

use super::adapter::{AdapterContext, AdapterError, AdapterInput, FrameworkAdapter};
use super::vanilla::{compile, finish, sourcemaps_for, VanillaAdapter};
use super::TransformResult;
use crate::compiler::{JsxOptions, JsxRuntime, SwcBackend, TranspileSpec};
use crate::framework::PackageVersions;
use async_trait::async_trait;
use semver::Version;

/// Which JSX runtime family to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsxFlavor {
    React,
    Preact,
    Solid,
}

/// Classic-mode Preact output calls `React.createElement`; this binds it.
/// Kept on one line so only first-line source map columns shift.
const PREACT_CLASSIC_PRELUDE: &str = "import { h as __kiln_h, Fragment as __kiln_Fragment } from \"preact\"; const React = { createElement: __kiln_h, Fragment: __kiln_Fragment }; ";

impl JsxFlavor {
    /// JSX lowering for the installed runtime version.
    ///
    /// React gained the automatic runtime in 17, Preact in 10.5. A missing
    /// or unreadable version selects classic mode.
    pub async fn options(self, versions: &PackageVersions) -> JsxOptions {
        match self {
            Self::React => match versions.major("react").await {
                Some(major) if major >= 17 => JsxOptions::automatic("react"),
                _ => JsxOptions::classic(),
            },
            Self::Preact => match versions.version("preact").await {
                Some(v) if v >= Version::new(10, 5, 0) => JsxOptions::automatic("preact"),
                _ => JsxOptions::classic(),
            },
            Self::Solid => JsxOptions::automatic("solid-js/h"),
        }
    }

    fn classic_runtime_package(self) -> &'static str {
        match self {
            Self::React => "react",
            Self::Preact => "preact",
            Self::Solid => "solid-js",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsxAdapter {
    flavor: JsxFlavor,
}

impl JsxAdapter {
    #[must_use]
    pub fn new(flavor: JsxFlavor) -> Self {
        Self { flavor }
    }

    #[must_use]
    pub fn flavor(&self) -> JsxFlavor {
        self.flavor
    }
}

#[async_trait]
impl FrameworkAdapter for JsxAdapter {
    fn name(&self) -> &'static str {
        match self.flavor {
            JsxFlavor::React => "jsx-react",
            JsxFlavor::Preact => "jsx-preact",
            JsxFlavor::Solid => "jsx-solid",
        }
    }

    async fn transform(
        &self,
        cx: &AdapterContext<'_>,
        input: &AdapterInput<'_>,
    ) -> Result<TransformResult, AdapterError> {
        // Plain scripts in a JSX project have nothing framework-specific.
        if !SwcBackend::is_jsx(input.path) {
            return VanillaAdapter.transform(cx, input).await;
        }

        let options = self.flavor.options(cx.versions).await;
        let dependencies = vec![options
            .runtime_module()
            .unwrap_or_else(|| self.flavor.classic_runtime_package().to_string())];
        let classic = options.runtime == JsxRuntime::Classic;

        let spec = TranspileSpec::new(input.path)
            .with_jsx(options)
            .with_sourcemaps(sourcemaps_for(input.dev));
        let mut output = compile(spec, input.source).await?;

        if classic && self.flavor == JsxFlavor::Preact {
            output.code.insert_str(0, PREACT_CLASSIC_PRELUDE);
        }
        Ok(finish(output, input.dev, dependencies))
    }
}
