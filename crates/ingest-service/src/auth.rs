//! `x-api-key` authentication middleware, adapted from the JWT bearer-token
//! middleware pattern: hash the credential, look it up, attach the caller's
//! identity to request extensions.
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, HttpMessage};
use credential_store::{hash_api_key, CredentialStore};
use error_handling::IngestError;
use futures::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub role: String,
}

pub struct ApiKeyAuth {
    store: Arc<dyn CredentialStore>,
}

impl ApiKeyAuth {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ApiKeyAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = ApiKeyAuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ApiKeyAuthMiddleware {
            service: Rc::new(service),
            store: self.store.clone(),
        }))
    }
}

pub struct ApiKeyAuthMiddleware<S> {
    service: Rc<S>,
    store: Arc<dyn CredentialStore>,
}

impl<S, B> Service<ServiceRequest> for ApiKeyAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let store = self.store.clone();

        Box::pin(async move {
            let raw_key = req
                .headers()
                .get("x-api-key")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.to_string());

            let raw_key = match raw_key {
                Some(k) if !k.is_empty() => k,
                _ => return Err(IngestError::MissingApiKey.into()),
            };

            let key_hash = hash_api_key(&raw_key);
            let record = store
                .lookup_by_hash(&key_hash)
                .await
                .map_err(|e| IngestError::Ingestion(e.to_string()))?;

            let record = match record {
                Some(r) if r.is_valid(chrono::Utc::now()) => r,
                _ => return Err(IngestError::InvalidApiKey.into()),
            };

            req.extensions_mut().insert(AuthenticatedUser {
                user_id: record.user_id,
                role: record.role,
            });

            service.call(req).await
        })
    }
}

impl actix_web::FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &actix_web::HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let user = req.extensions().get::<AuthenticatedUser>().cloned();
        match user {
            Some(user) => ready(Ok(user)),
            None => ready(Err(IngestError::MissingApiKey.into())),
        }
    }
}
