use std::sync::Arc;

use typed_builder::TypedBuilder;

use crate::{script::Script, session::VirtualUser, transport::Transport};

/// A [`Scenario`] glues a [`Script`] to the [`Transport`] its users share.
///
/// Both are reference counted: every virtual user spawned from the scenario
/// holds a clone of the same script and transport.
///
/// # Example
/// ```rust
/// use karga_script::{Scenario, Script, step::StepSpec};
/// use karga_script::transport::{HttpRequest, HttpResponse, Transport};
///
/// struct AlwaysOk;
/// impl Transport for AlwaysOk {
///     async fn send(&self, _request: &HttpRequest) -> HttpResponse {
///         HttpResponse::new(200, "ok")
///     }
/// }
///
/// let scenario = Scenario::builder()
///     .name("Homepage")
///     .script(Script::new("example.com", vec![StepSpec::new(http::Method::GET, "/")]))
///     .transport(AlwaysOk)
///     .build();
/// assert_eq!(scenario.name, "Homepage");
/// ```
#[derive(TypedBuilder)]
pub struct Scenario<T: Transport> {
    #[builder(setter(into))]
    pub name: String,
    #[builder(setter(transform = |script: Script| Arc::new(script)))]
    pub script: Arc<Script>,
    #[builder(setter(transform = |transport: T| Arc::new(transport)))]
    pub transport: Arc<T>,
}

impl<T: Transport> Scenario<T> {
    /// A fresh virtual user with its own allocation state.
    pub fn virtual_user(&self, id: usize) -> VirtualUser<T> {
        VirtualUser::new(id, Arc::clone(&self.script), Arc::clone(&self.transport))
    }
}
