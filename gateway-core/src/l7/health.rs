//! Health-check endpoint (§4.9): routes with `is_health_endpoint` set serve
//! `application/health+json` instead of being proxied upstream.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::BodyExt;
use serde::Serialize;

use crate::l7::reverse_proxy::empty_body;
use crate::middleware::{HttpRequest, HttpResponse, L7Handler};

#[derive(Serialize)]
struct HealthBody<'a> {
    status: &'a str,
    version: &'a str,
    #[serde(rename = "releaseId")]
    release_id: &'a str,
    #[serde(rename = "serviceId")]
    service_id: &'a str,
}

pub struct HealthEndpoint {
    pub version: String,
    pub release_id: String,
    pub service_id: String,
}

#[async_trait]
impl L7Handler for HealthEndpoint {
    async fn handle(&self, _req: HttpRequest) -> HttpResponse {
        let payload = HealthBody {
            status: "pass",
            version: &self.version,
            release_id: &self.release_id,
            service_id: &self.service_id,
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(bytes) => http_body_util::Full::new(Bytes::from(bytes))
                .map_err(|never| match never {})
                .boxed(),
            Err(_) => empty_body(),
        };
        http::Response::builder()
            .status(http::StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "application/health+json")
            .body(body)
            .unwrap_or_else(|_| {
                http::Response::builder()
                    .status(http::StatusCode::INTERNAL_SERVER_ERROR)
                    .body(empty_body())
                    .unwrap()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_body_serializes_expected_shape() {
        let payload = HealthBody {
            status: "pass",
            version: "1.0.0",
            release_id: "1.0.0",
            service_id: "node-abcd",
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"status\":\"pass\""));
        assert!(json.contains("\"releaseId\":\"1.0.0\""));
        assert!(json.contains("\"serviceId\":\"node-abcd\""));
    }
}
