use super::client::{build_headers, map_response, network_error, ApiClient, RawResponse};
use crate::types::{ApiError, ApiResult, UploadFile, NETWORK_ERROR_STATUS};
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;

impl ApiClient {
    /// Multipart upload with a `file` part and flat string fields.
    ///
    /// Shares the bearer and envelope handling of [`ApiClient::request`] but a 401 is
    /// returned as-is: uploads never go through the refresh-and-retry path.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        file: &UploadFile,
        fields: &[(String, String)],
        token: Option<&str>,
    ) -> ApiResult<T> {
        let bytes = match tokio::fs::read(&file.path).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(file = %file.path.display(), error = %e, "upload source is unreadable");
                return ApiResult::failure(
                    ApiError::new(NETWORK_ERROR_STATUS, "Could not read the selected file.")
                        .with_code("file_unreadable"),
                );
            }
        };

        let part = match Part::bytes(bytes)
            .file_name(file.file_name.clone())
            .mime_str(&file.mime_type)
        {
            Ok(p) => p,
            Err(_) => {
                return ApiResult::failure(
                    ApiError::new(
                        NETWORK_ERROR_STATUS,
                        format!("Unsupported file type: {}", file.mime_type),
                    )
                    .with_code("invalid_mime_type"),
                );
            }
        };

        let form = fields
            .iter()
            .fold(Form::new().part("file", part), |form, (k, v)| {
                form.text(k.clone(), v.clone())
            });

        let token = token.map(str::trim).filter(|t| !t.is_empty());
        tracing::debug!(path, file = %file.file_name, "uploading file");
        let res = self
            .http
            .post(self.config.url_for(path))
            .headers(build_headers(token, &HeaderMap::new(), false))
            .multipart(form)
            .send()
            .await;

        let res = match res {
            Ok(r) => r,
            Err(e) => return ApiResult::failure(network_error(&e)),
        };
        let status = res.status().as_u16();
        match res.text().await {
            Ok(body) => map_response(RawResponse { status, body }),
            Err(e) => ApiResult::failure(network_error(&e)),
        }
    }
}
