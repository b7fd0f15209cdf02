//! Inference boundary.
//!
//! The pipeline treats annotation as an opaque record-in, record-out call
//! that either succeeds or fails. `HttpAnnotator` talks to a real inference
//! endpoint; `EchoAnnotator` is the stand-in used when no endpoint is
//! configured.

use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    #[error("inference request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("inference endpoint returned status {status}")]
    Status { status: u16 },
}

#[async_trait]
pub trait Annotator: Send + Sync {
    async fn annotate(
        &self,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, AnnotateError>;
}

/// Annotator backed by an HTTP inference endpoint.
///
/// Sends `{"input": <record>}` and takes the 200 response body as the
/// annotated record. Any non-success status is an ordinary failure subject
/// to the processor's retry bound.
pub struct HttpAnnotator {
    url: String,
    client: reqwest::Client,
}

impl HttpAnnotator {
    pub fn new(url: impl Into<String>) -> Result<Self, AnnotateError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Annotator for HttpAnnotator {
    async fn annotate(
        &self,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, AnnotateError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "input": input }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnnotateError::Status {
                status: status.as_u16(),
            });
        }

        Ok(response.json().await?)
    }
}

/// Pass-through annotator: wraps the record unchanged.
pub struct EchoAnnotator;

#[async_trait]
impl Annotator for EchoAnnotator {
    async fn annotate(
        &self,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, AnnotateError> {
        Ok(serde_json::json!({ "processed": true, "data": input }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn http_annotator_posts_input_and_returns_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/annotate"))
            .and(body_partial_json(serde_json::json!({"input": {"x": 1}})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"label": "positive"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let annotator = HttpAnnotator::new(format!("{}/annotate", server.uri())).unwrap();
        let result = annotator.annotate(&serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(result, serde_json::json!({"label": "positive"}));
    }

    #[tokio::test]
    async fn http_annotator_surfaces_error_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let annotator = HttpAnnotator::new(server.uri()).unwrap();
        let err = annotator
            .annotate(&serde_json::json!({"x": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, AnnotateError::Status { status: 503 }));
    }

    #[tokio::test]
    async fn echo_annotator_wraps_record() {
        let result = EchoAnnotator
            .annotate(&serde_json::json!({"x": 2}))
            .await
            .unwrap();
        assert_eq!(
            result,
            serde_json::json!({"processed": true, "data": {"x": 2}})
        );
    }
}
