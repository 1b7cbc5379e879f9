use super::native::{Registration, RegistrationFuture, ServiceWorkerRequest};
use super::Sandbox;
use crate::audit;
use crate::codec::{ProxyUrlDescriptor, UrlCodec};
use crate::dom::{Dom, DomException, DomResult};
use crate::resource::{classify, Initiator, LoadContext};
use std::future;

impl Sandbox {
    /// `navigator.serviceWorker.register(script_url, { scope })`.
    ///
    /// The script URL and the scope are sent to the platform in proxy form
    /// with the script kind. Registrations for a non-https destination, or
    /// from a sandboxed frame, fail without reaching the platform. The
    /// registration the page receives reports destination URLs.
    pub fn register_service_worker(
        &self,
        dom: &Dom,
        script_url: &str,
        scope: Option<&str>,
    ) -> RegistrationFuture {
        let request = match self.service_worker_request(dom, script_url, scope) {
            Ok(request) => request,
            Err(e) => {
                audit::log_service_worker(self.window, script_url, "reject");
                return Box::pin(future::ready(Err(e)));
            }
        };
        audit::log_service_worker(self.window, &request.script_url, "forward");

        let pending = (self.natives.register_service_worker)(request);
        let codec = self.codec.clone();
        Box::pin(async move {
            let registration = pending.await?;
            Ok(Registration {
                script_url: to_destination(&codec, registration.script_url),
                scope: to_destination(&codec, registration.scope),
            })
        })
    }

    fn service_worker_request(
        &self,
        dom: &Dom,
        script_url: &str,
        scope: Option<&str>,
    ) -> DomResult<ServiceWorkerRequest> {
        if self.sandboxed_frame {
            return Err(DomException::Security(
                "service workers are not available in sandboxed frames".to_string(),
            ));
        }
        let base = self.destination_base(dom, self.document).ok_or_else(|| {
            DomException::Security("the document has no destination origin".to_string())
        })?;
        let script = self
            .codec
            .resolve_as_destination(script_url, &base)
            .map_err(|e| DomException::TypeError(e.to_string()))?;
        if script.scheme() != "https" {
            return Err(DomException::Security(format!(
                "service worker script {} is not served over https",
                script
            )));
        }
        let scope = match scope {
            Some(scope) => self.codec.resolve_as_destination(scope, &base),
            None => self.codec.resolve_as_destination("./", &script),
        }
        .map_err(|e| DomException::TypeError(e.to_string()))?;

        let kind = classify(&LoadContext::Initiator(Initiator::ServiceWorkerRegistration));
        let encode = |url| {
            self.codec.encode(
                &ProxyUrlDescriptor::new(url, self.session.clone())
                    .with_kind(kind)
                    .with_port(self.port),
            )
        };
        Ok(ServiceWorkerRequest {
            script_url: encode(script),
            scope: encode(scope),
        })
    }
}

fn to_destination(codec: &UrlCodec, url: String) -> String {
    match codec.decode(&url) {
        Some(descriptor) => descriptor.destination().to_string(),
        None => url,
    }
}
