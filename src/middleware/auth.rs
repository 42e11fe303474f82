//! JWT authentication middleware (spec.md §6). RS256 tokens are verified
//! against a JWKS endpoint fetched lazily and cached for a few minutes;
//! `AUTH_HS256_SECRET`, when set, is tried as a fallback for local dev where
//! standing up a JWKS endpoint isn't worth it. `/health` is exempt.

use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use log::warn;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::settings::Settings;

const JWKS_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// The caller's identity, injected into request extensions once a token
/// validates. Route handlers pull this out instead of re-parsing the token.
#[derive(Debug, Clone, Copy)]
pub struct AuthedUser(pub Uuid);

impl actix_web::FromRequest for AuthedUser {
    type Error = Error;
    type Future = std::future::Ready<Result<Self, Self::Error>>;

    fn from_request(req: &actix_web::HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let result = req
            .extensions()
            .get::<AuthedUser>()
            .copied()
            .ok_or_else(|| actix_web::error::ErrorUnauthorized("missing authentication"));
        std::future::ready(result)
    }
}

struct JwksCache {
    http: Client,
    jwks_url: String,
    cached: RwLock<Option<(JwkSet, Instant)>>,
}

impl JwksCache {
    fn new(jwks_url: String) -> Self {
        Self {
            http: Client::new(),
            jwks_url,
            cached: RwLock::new(None),
        }
    }

    async fn key_for(&self, kid: &str) -> Option<DecodingKey> {
        {
            let guard = self.cached.read().await;
            if let Some((set, fetched_at)) = guard.as_ref() {
                if fetched_at.elapsed() < JWKS_CACHE_TTL {
                    if let Some(jwk) = set.find(kid) {
                        return rsa_decoding_key(jwk);
                    }
                }
            }
        }

        let fetched = match self.http.get(&self.jwks_url).send().await {
            Ok(resp) => match resp.json::<JwkSet>().await {
                Ok(set) => set,
                Err(e) => {
                    warn!("auth: malformed JWKS response: {e}");
                    return None;
                }
            },
            Err(e) => {
                warn!("auth: failed to fetch JWKS from {}: {e}", self.jwks_url);
                return None;
            }
        };

        let key = fetched.find(kid).and_then(rsa_decoding_key);
        *self.cached.write().await = Some((fetched, Instant::now()));
        key
    }
}

fn rsa_decoding_key(jwk: &Jwk) -> Option<DecodingKey> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        _ => None,
    }
}

async fn authenticate(token: &str, jwks: &JwksCache, hs256_secret: Option<&str>) -> Option<Uuid> {
    if let Ok(header) = decode_header(token) {
        if let Some(kid) = header.kid.as_deref() {
            if let Some(key) = jwks.key_for(kid).await {
                let mut validation = Validation::new(Algorithm::RS256);
                validation.validate_exp = true;
                if let Ok(data) = decode::<Claims>(token, &key, &validation) {
                    if let Ok(uid) = data.claims.sub.parse() {
                        return Some(uid);
                    }
                }
            }
        }
    }

    let secret = hs256_secret?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation).ok()?;
    data.claims.sub.parse().ok()
}

/// Extracts the bearer token from either the `Authorization` header or a
/// `token` query parameter — `EventSource` can't set custom headers, so
/// `/stream/{symbol}` and `/news/stream` rely on the latter (spec.md §6).
fn extract_token(req: &ServiceRequest) -> Option<String> {
    if let Some(tok) = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
    {
        return Some(tok.to_owned());
    }

    req.query_string().split('&').find_map(|kv| kv.strip_prefix("token=").map(str::to_owned))
}

pub struct Auth {
    jwks: Arc<JwksCache>,
    hs256_secret: Option<Arc<str>>,
}

impl Auth {
    pub fn new(settings: &Settings) -> Self {
        Self {
            jwks: Arc::new(JwksCache::new(settings.auth_jwks_url.clone())),
            hs256_secret: settings.auth_hs256_secret.as_deref().map(Arc::from),
        }
    }
}

impl<S> Transform<S, ServiceRequest> for Auth
where
    S: Service<ServiceRequest, Response = ServiceResponse, Error = Error> + 'static,
{
    type Response = ServiceResponse;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMw<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, srv: S) -> Self::Future {
        ok(AuthMw {
            inner: Rc::new(srv),
            jwks: self.jwks.clone(),
            hs256_secret: self.hs256_secret.clone(),
        })
    }
}

pub struct AuthMw<S> {
    inner: Rc<S>,
    jwks: Arc<JwksCache>,
    hs256_secret: Option<Arc<str>>,
}

impl<S> Service<ServiceRequest> for AuthMw<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse, Error = Error> + 'static,
{
    type Response = ServiceResponse;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if req.path() == "/health" {
            let inner = self.inner.clone();
            return Box::pin(async move { inner.call(req).await });
        }

        let jwks = self.jwks.clone();
        let hs256_secret = self.hs256_secret.clone();
        let inner = self.inner.clone();
        let token = extract_token(&req);

        Box::pin(async move {
            let Some(token) = token else {
                return Err(actix_web::error::ErrorUnauthorized("missing bearer token"));
            };
            match authenticate(&token, &jwks, hs256_secret.as_deref()).await {
                Some(user_id) => {
                    req.extensions_mut().insert(AuthedUser(user_id));
                    inner.call(req).await
                }
                None => Err(actix_web::error::ErrorUnauthorized("invalid token")),
            }
        })
    }
}
