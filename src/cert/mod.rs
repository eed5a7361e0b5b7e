mod certificate;
mod certificate_chain;

pub use certificate::{Certificate, TimeStampingUsage};
pub use certificate_chain::CertificateChain;
