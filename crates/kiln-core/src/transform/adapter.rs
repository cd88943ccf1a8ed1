//! Framework adapters and construction-time routing.

use super::jsx::{JsxAdapter, JsxFlavor};
use super::vanilla::{DecoratorAdapter, VanillaAdapter};
use super::vue::VueAdapter;
use super::TransformResult;
use crate::compiler::{Capabilities, CompilerError};
use crate::framework::{FrameworkTag, PackageVersions};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Input handed to an adapter.
#[derive(Debug, Clone, Copy)]
pub struct AdapterInput<'a> {
    pub path: &'a Path,
    pub source: &'a str,
    pub dev: bool,
}

/// Shared services adapters may consult.
#[derive(Debug, Clone, Copy)]
pub struct AdapterContext<'a> {
    pub versions: &'a PackageVersions,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Compile(#[from] CompilerError),

    #[error("malformed {kind} component: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("{0}")]
    Unsupported(String),
}

/// One framework family's transform step.
#[async_trait]
pub trait FrameworkAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transform(
        &self,
        cx: &AdapterContext<'_>,
        input: &AdapterInput<'_>,
    ) -> Result<TransformResult, AdapterError>;
}

/// The closed set of adapters a framework tag can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adapter {
    Jsx(JsxAdapter),
    Vue(VueAdapter),
    Decorators(DecoratorAdapter),
    Vanilla(VanillaAdapter),
}

impl Adapter {
    /// Pick the adapter for `tag`, given which compilers this build has.
    ///
    /// Families whose backing compiler is missing resolve to
    /// [`Adapter::Vanilla`] here, once, instead of failing per request.
    #[must_use]
    pub fn for_framework(tag: FrameworkTag, capabilities: Capabilities) -> Self {
        let swc = capabilities.swc.is_available();
        match tag {
            FrameworkTag::React | FrameworkTag::Next | FrameworkTag::Remix if swc => {
                Self::Jsx(JsxAdapter::new(JsxFlavor::React))
            }
            FrameworkTag::Preact if swc => Self::Jsx(JsxAdapter::new(JsxFlavor::Preact)),
            FrameworkTag::Solid if swc => Self::Jsx(JsxAdapter::new(JsxFlavor::Solid)),
            FrameworkTag::Angular | FrameworkTag::Lit if swc => {
                Self::Decorators(DecoratorAdapter)
            }
            // Template compilation happens in the browser; only the script
            // block needs a compiler, and vanilla covers that.
            FrameworkTag::Vue | FrameworkTag::Nuxt => Self::Vue(VueAdapter),
            _ => Self::Vanilla(VanillaAdapter),
        }
    }

    /// Whether `tag` routes to a dedicated adapter in a full-featured build
    /// but was downgraded here.
    #[must_use]
    pub fn is_degraded(tag: FrameworkTag, capabilities: Capabilities) -> bool {
        let resolved = Self::for_framework(tag, capabilities);
        resolved.is_vanilla() && !matches!(tag, FrameworkTag::Vanilla)
    }

    #[must_use]
    pub fn is_vanilla(&self) -> bool {
        matches!(self, Self::Vanilla(_))
    }

    fn inner(&self) -> &dyn FrameworkAdapter {
        match self {
            Self::Jsx(a) => a,
            Self::Vue(a) => a,
            Self::Decorators(a) => a,
            Self::Vanilla(a) => a,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner().name()
    }

    pub async fn transform(
        &self,
        cx: &AdapterContext<'_>,
        input: &AdapterInput<'_>,
    ) -> Result<TransformResult, AdapterError> {
        self.inner().transform(cx, input).await
    }
}
