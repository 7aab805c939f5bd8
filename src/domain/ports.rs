use crate::domain::model::{FetchRequest, HttpResponse};
use crate::utils::error::Result;

pub trait HttpTransport: Send + Sync {
    /// Sends one attempt of `request`. Non-2xx statuses are returned as
    /// responses, not errors.
    fn send(
        &self,
        request: &FetchRequest,
    ) -> impl std::future::Future<Output = Result<HttpResponse>> + Send;
}

impl<T: HttpTransport> HttpTransport for std::sync::Arc<T> {
    fn send(
        &self,
        request: &FetchRequest,
    ) -> impl std::future::Future<Output = Result<HttpResponse>> + Send {
        (**self).send(request)
    }
}
