//! CA certificates received over `certificate_transfer` relations.

use std::{collections::BTreeSet, io::Cursor};

use super::CERTIFICATE_TRANSFER;
use crate::juju::{Member, Model};

/// Every distinct CA certificate published by the providers' units.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CaBundle {
    certs: BTreeSet<String>,
}

impl CaBundle {
    pub async fn load(model: &dyn Model) -> Self {
        let relations = match model.relation_ids(CERTIFICATE_TRANSFER).await {
            Ok(relations) => relations,
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "failed to list certificate transfer relations"
                );
                return Self::default();
            }
        };

        let mut pems = Vec::new();
        for relation in &relations {
            let units = model.relation_units(relation).await.unwrap_or_default();
            for unit in units {
                match model.relation_get(relation, &Member::Unit(unit.clone())).await {
                    Ok(mut data) => pems.extend(data.remove("ca")),
                    Err(error) => tracing::warn!(
                        %relation,
                        unit,
                        error = &error as &dyn std::error::Error,
                        "failed to read certificate transfer data"
                    ),
                }
            }
        }
        Self::from_pems(pems.iter().map(String::as_str))
    }

    /// Keeps the inputs that hold PEM certificates, dropping duplicates.
    pub fn from_pems<'p>(pems: impl IntoIterator<Item = &'p str>) -> Self {
        let certs = pems
            .into_iter()
            .map(str::trim)
            .filter(|pem| {
                let valid = is_certificate(pem);
                if !valid {
                    tracing::warn!("ignoring ca data that is not a PEM certificate");
                }
                valid
            })
            .map(str::to_string)
            .collect();
        Self { certs }
    }

    pub fn is_ready(&self) -> bool {
        !self.certs.is_empty()
    }

    /// The certificates, newline-joined into one PEM bundle.
    pub fn bundle(&self) -> String {
        self.certs
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn is_certificate(pem: &str) -> bool {
    let mut reader = Cursor::new(pem.as_bytes());
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>();
    matches!(certs, Ok(certs) if !certs.is_empty())
}
