use bytes::Bytes;
use gitbruv_core::{ObjectType, Oid, RefName};
use gitbruv_storage::{GitRepository, StoreError};
use std::fmt;

use crate::access::Operation;
use crate::error::{FrontendError, Result};
use crate::protocol::{PktLineWriter, ReceivePackCapabilities, UploadPackCapabilities};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    UploadPack,
    ReceivePack,
}

impl Service {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "git-upload-pack" => Ok(Service::UploadPack),
            "git-receive-pack" => Ok(Service::ReceivePack),
            other => Err(FrontendError::InvalidRequest(format!(
                "unsupported service: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Service::UploadPack => Operation::Read,
            Service::ReceivePack => Operation::Write,
        }
    }

    pub fn advertisement_content_type(&self) -> String {
        format!("application/x-{}-advertisement", self.as_str())
    }

    pub fn result_content_type(&self) -> String {
        format!("application/x-{}-result", self.as_str())
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One advertised line: `<oid> <name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedRef {
    pub name: String,
    pub oid: Oid,
}

/// `HEAD` (when it resolves), then every ref by name, each annotated tag
/// followed by its peeled `^{}` line.
pub fn collect_refs(repo: &GitRepository) -> Result<Vec<AdvertisedRef>> {
    let mut refs = Vec::new();

    match repo.refs().resolve(RefName::HEAD) {
        Ok(oid) => refs.push(AdvertisedRef {
            name: RefName::HEAD.to_string(),
            oid,
        }),
        Err(StoreError::RefNotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    for (name, oid) in repo.refs().list_refs()? {
        refs.push(AdvertisedRef {
            name: name.to_string(),
            oid,
        });
        if name.is_tag() {
            let obj = repo.odb().get(&oid)?;
            if obj.kind() == ObjectType::Tag {
                let peeled = repo.odb().peel(&oid)?;
                refs.push(AdvertisedRef {
                    name: format!("{}^{{}}", name),
                    oid: peeled.oid(),
                });
            }
        }
    }

    Ok(refs)
}

pub fn format_ref_advertisement(
    writer: &mut PktLineWriter,
    refs: &[AdvertisedRef],
    capabilities: &str,
) -> Result<()> {
    if refs.is_empty() {
        writer.write_line(&format!("{} capabilities^{{}}\0{}", Oid::ZERO, capabilities))?;
    } else {
        for (i, r) in refs.iter().enumerate() {
            if i == 0 {
                writer.write_line(&format!("{} {}\0{}", r.oid, r.name, capabilities))?;
            } else {
                writer.write_line(&format!("{} {}", r.oid, r.name))?;
            }
        }
    }
    writer.write_flush();
    Ok(())
}

/// Full `info/refs` body for a smart-HTTP client.
pub fn advertise_refs(repo: &GitRepository, service: Service) -> Result<Bytes> {
    let refs = collect_refs(repo)?;
    let capabilities = match service {
        Service::UploadPack => {
            let head = if refs.first().is_some_and(|r| r.name == RefName::HEAD) {
                repo.refs().head_target()?
            } else {
                None
            };
            UploadPackCapabilities::new(head).to_string()
        }
        Service::ReceivePack => ReceivePackCapabilities::server().to_string(),
    };

    let mut writer = PktLineWriter::new();
    writer.write_line(&format!("# service={}", service))?;
    writer.write_flush();
    format_ref_advertisement(&mut writer, &refs, &capabilities)?;

    tracing::debug!(repo_id = %repo.id(), %service, refs = refs.len(), "advertised refs");
    Ok(writer.into_bytes())
}
