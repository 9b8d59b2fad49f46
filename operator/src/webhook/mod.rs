//! Validating admission webhook.
//!
//! Serves `/webhooks/validate` and denies shoot specs whose network config
//! would fail reconciliation anyway. Only shoots labeled for this provider
//! are inspected; everything else is allowed untouched.

use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use tracing::{debug, info};

use crate::network::validation::aggregate;

pub mod shoot;

use shoot::{is_relevant, validate_shoot, ShootDocument};

/// Decide about one admission review.
pub fn review_shoot(review: AdmissionReview<DynamicObject>) -> AdmissionReview<DynamicObject> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(err) => return AdmissionResponse::invalid(err.to_string()).into_review(),
    };

    let mut response = AdmissionResponse::from(&request);
    if let Some(object) = &request.object {
        if is_relevant(object.metadata.labels.as_ref()) {
            match serde_json::from_value::<ShootDocument>(object.data.clone()) {
                Ok(document) => {
                    let errors = validate_shoot(&document);
                    if !errors.is_empty() {
                        response = response.deny(aggregate(&errors));
                    }
                }
                Err(err) => {
                    response = response.deny(format!("could not decode shoot: {err}"));
                }
            }
        }
    }
    response.into_review()
}

async fn handle(request: Request<Body>) -> Result<Response<Body>, Infallible> {
    if request.method() != Method::POST || request.uri().path() != "/webhooks/validate" {
        return Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .expect("static response builds"));
    }

    let body = match hyper::body::to_bytes(request.into_body()).await {
        Ok(body) => body,
        Err(err) => {
            return Ok(bad_request(format!("could not read request body: {err}")));
        }
    };
    let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(err) => {
            return Ok(bad_request(format!("could not decode admission review: {err}")));
        }
    };

    let reviewed = review_shoot(review);
    debug!(
        allowed = reviewed.response.as_ref().map(|r| r.allowed),
        "reviewed shoot"
    );
    let bytes = serde_json::to_vec(&reviewed).expect("admission review serializes");
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(bytes))
        .expect("static response builds"))
}

fn bad_request(message: String) -> Response<Body> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(Body::from(message))
        .expect("static response builds")
}

/// Serve the admission webhook until the process stops.
pub async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    info!(%addr, "serving admission webhook");
    let make_service = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });
    Server::bind(&addr).serve(make_service).await?;
    Ok(())
}
