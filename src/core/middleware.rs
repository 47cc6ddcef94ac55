//! Middleware chain wrapped around the forwarding handler.
//!
//! A middleware decorates a handler; `Chain::then` folds the decorators
//! right to left so the first middleware listed is outermost. Decorators
//! never unwind: they signal completion through the response they return
//! and the context abort flag.
use std::{net::IpAddr, num::NonZeroU32, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use axum::body::Body;
use futures_util::{FutureExt, future::BoxFuture};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use http::{HeaderValue, Method, StatusCode};
use hyper::Response;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use uuid::Uuid;

use crate::core::context::RequestContext;

pub type Handler = Arc<dyn Fn(Arc<RequestContext>) -> BoxFuture<'static, Response<Body>> + Send + Sync>;
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Plain-text response helper shared by the decorators and the dispatcher.
pub fn text_response(status: StatusCode, body: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// An ordered sequence of decorators.
#[derive(Clone, Default)]
pub struct Chain {
    middlewares: Vec<Middleware>,
}

impl Chain {
    pub fn new(middlewares: Vec<Middleware>) -> Self {
        Self { middlewares }
    }

    /// A new chain with extra decorators appended (innermost position).
    pub fn append(&self, extra: Vec<Middleware>) -> Self {
        let mut middlewares = self.middlewares.clone();
        middlewares.extend(extra);
        Self { middlewares }
    }

    /// Fold the chain around the final handler, first middleware outermost.
    pub fn then(&self, last: Handler) -> Handler {
        let mut handler = last;
        for mw in self.middlewares.iter().rev() {
            handler = mw(handler);
        }
        handler
    }
}

/// Catch panics from downstream, log them and answer 500.
pub fn recovery() -> Middleware {
    Arc::new(|next: Handler| -> Handler {
        Arc::new(move |ctx: Arc<RequestContext>| {
            let next = Arc::clone(&next);
            async move {
                match AssertUnwindSafe(next(Arc::clone(&ctx))).catch_unwind().await {
                    Ok(response) => response,
                    Err(panic) => {
                        tracing::error!(
                            path = %ctx.path(),
                            panic = %panic_message(&panic),
                            "panic recovered"
                        );
                        ctx.abort();
                        text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                    }
                }
            }
            .boxed()
        })
    })
}

/// Log method, path, client address and latency once downstream returns.
pub fn logger() -> Middleware {
    Arc::new(|next: Handler| -> Handler {
        Arc::new(move |ctx: Arc<RequestContext>| {
            let next = Arc::clone(&next);
            async move {
                let start = std::time::Instant::now();
                let response = next(Arc::clone(&ctx)).await;
                tracing::info!(
                    method = %ctx.method(),
                    path = %ctx.path(),
                    client = ctx.client_ip().as_deref().unwrap_or("-"),
                    status = response.status().as_u16(),
                    latency_ms = start.elapsed().as_millis() as u64,
                    "request handled"
                );
                response
            }
            .boxed()
        })
    })
}

/// Propagate or mint an `X-Request-ID`, exposing it to downstream
/// handlers via the context and to the client via the response.
pub fn request_id() -> Middleware {
    Arc::new(|next: Handler| -> Handler {
        Arc::new(move |ctx: Arc<RequestContext>| {
            let next = Arc::clone(&next);
            async move {
                let id = ctx
                    .header("x-request-id")
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                ctx.set("request_id", serde_json::Value::String(id.clone()));

                let mut response = next(Arc::clone(&ctx)).await;
                if let Ok(value) = HeaderValue::from_str(&id) {
                    response.headers_mut().insert("x-request-id", value);
                }
                response
            }
            .boxed()
        })
    })
}

/// Permissive CORS headers; preflight requests short-circuit with 200.
pub fn cors() -> Middleware {
    Arc::new(|next: Handler| -> Handler {
        Arc::new(move |ctx: Arc<RequestContext>| {
            let next = Arc::clone(&next);
            async move {
                let mut response = if ctx.method() == Method::OPTIONS {
                    ctx.abort();
                    text_response(StatusCode::OK, "")
                } else {
                    next(Arc::clone(&ctx)).await
                };

                let headers = response.headers_mut();
                headers.insert(
                    "access-control-allow-origin",
                    HeaderValue::from_static("*"),
                );
                headers.insert(
                    "access-control-allow-methods",
                    HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
                );
                headers.insert(
                    "access-control-allow-headers",
                    HeaderValue::from_static("Content-Type, Authorization"),
                );
                response
            }
            .boxed()
        })
    })
}

/// Bound downstream latency. On expiry the downstream future is dropped,
/// which cancels any in-flight proxying, and the client gets 504.
pub fn timeout(deadline: Duration) -> Middleware {
    Arc::new(move |next: Handler| -> Handler {
        Arc::new(move |ctx: Arc<RequestContext>| {
            let next = Arc::clone(&next);
            async move {
                match tokio::time::timeout(deadline, next(Arc::clone(&ctx))).await {
                    Ok(response) => response,
                    Err(_) => {
                        tracing::warn!(path = %ctx.path(), "request deadline exceeded");
                        ctx.abort();
                        text_response(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout")
                    }
                }
            }
            .boxed()
        })
    })
}

/// Require a `Bearer` token signed with an HS-family algorithm. Verified
/// claims are stashed in the context under `"claims"`.
pub fn jwt(secret: String) -> Middleware {
    let key = Arc::new(DecodingKey::from_secret(secret.as_bytes()));
    Arc::new(move |next: Handler| -> Handler {
        let key = Arc::clone(&key);
        Arc::new(move |ctx: Arc<RequestContext>| {
            let next = Arc::clone(&next);
            let key = Arc::clone(&key);
            async move {
                let token = ctx
                    .header("authorization")
                    .and_then(|v| v.strip_prefix("Bearer "));
                let Some(token) = token else {
                    ctx.abort();
                    return text_response(
                        StatusCode::UNAUTHORIZED,
                        "Unauthorized: Missing or invalid Authorization header",
                    );
                };

                let algorithm = match decode_header(token).map(|h| h.alg) {
                    Ok(alg @ (Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)) => alg,
                    _ => {
                        ctx.abort();
                        return text_response(StatusCode::UNAUTHORIZED, "Unauthorized: Invalid token");
                    }
                };

                let mut validation = Validation::new(algorithm);
                validation.required_spec_claims.clear();
                match decode::<serde_json::Value>(token, &key, &validation) {
                    Ok(data) => {
                        ctx.set("claims", data.claims);
                        next(Arc::clone(&ctx)).await
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "jwt validation failed");
                        ctx.abort();
                        text_response(StatusCode::UNAUTHORIZED, "Unauthorized: Invalid token")
                    }
                }
            }
            .boxed()
        })
    })
}

type IpLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Token-bucket limiting keyed by client IP. The limiter state is owned
/// by the middleware instance, one per configuration.
pub fn rate_limit(per_second: u32, burst: u32) -> Middleware {
    let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst).unwrap_or(per_second);
    let quota = Quota::per_second(per_second).allow_burst(burst);
    let limiter: Arc<IpLimiter> = Arc::new(RateLimiter::keyed(quota));

    Arc::new(move |next: Handler| -> Handler {
        let limiter = Arc::clone(&limiter);
        Arc::new(move |ctx: Arc<RequestContext>| {
            let next = Arc::clone(&next);
            let limiter = Arc::clone(&limiter);
            async move {
                let allowed = match ctx.client_addr() {
                    Some(addr) => limiter.check_key(&addr.ip()).is_ok(),
                    None => true,
                };
                if !allowed {
                    ctx.abort();
                    let mut response =
                        text_response(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests");
                    response
                        .headers_mut()
                        .insert("x-rate-limit-retry-after", HeaderValue::from_static("1"));
                    return response;
                }
                next(Arc::clone(&ctx)).await
            }
            .boxed()
        })
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
