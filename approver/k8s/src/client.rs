use crate::CertificateSigningRequest;
use kube::api::{PostParams, ResourceExt};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The write was based on a stale resource version.
    #[error("the CSR was modified concurrently")]
    Conflict,

    #[error("request rejected with status {code}: {message}")]
    Rejected { code: u16, message: String },

    #[error("failed to encode CSR: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transient API failure: {0}")]
    Transient(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// The cluster API operations the approver needs on CertificateSigningRequests.
#[async_trait::async_trait]
pub trait CsrApi: Send + Sync {
    /// Fetches the named CSR, returning `None` if it no longer exists.
    async fn get(&self, name: &str) -> Result<Option<CertificateSigningRequest>, ApiError>;

    /// Writes the CSR's conditions through the approval subresource. The
    /// write must be conditional on the CSR's resource version.
    async fn update_approval(
        &self,
        csr: &CertificateSigningRequest,
    ) -> Result<CertificateSigningRequest, ApiError>;
}

// === impl ApiError ===

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict | Self::Transient(_))
    }
}

impl From<kube::Error> for ApiError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(rsp) if rsp.code == 409 => Self::Conflict,
            kube::Error::Api(rsp) if (400..500).contains(&rsp.code) => Self::Rejected {
                code: rsp.code,
                message: rsp.message.clone(),
            },
            error => Self::Transient(Box::new(error)),
        }
    }
}

// === impl Api ===

#[async_trait::async_trait]
impl CsrApi for kube::Api<CertificateSigningRequest> {
    async fn get(&self, name: &str) -> Result<Option<CertificateSigningRequest>, ApiError> {
        Ok(self.get_opt(name).await?)
    }

    async fn update_approval(
        &self,
        csr: &CertificateSigningRequest,
    ) -> Result<CertificateSigningRequest, ApiError> {
        let data = serde_json::to_vec(csr)?;
        let csr = self
            .replace_subresource("approval", &csr.name_any(), &PostParams::default(), data)
            .await?;
        Ok(csr)
    }
}
