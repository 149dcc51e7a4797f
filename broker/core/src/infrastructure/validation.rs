// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! gRPC client for the IP-to-identity validation service.
//!
//! The orchestration layer that assigns addresses to freshly started
//! containers answers `LookupByAddress` with the application identity bound
//! to an address, or an empty id when the address is unknown. Every call is
//! bounded by the configured lookup timeout.

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tonic::transport::Endpoint;

use crate::application::identity::IdentityLookup;
use crate::domain::error::BrokerError;
use crate::domain::identity::AppId;

// Generated protobuf code
pub mod pb {
    tonic::include_proto!("edge.validation.v1");
}

use pb::identity_lookup_client::IdentityLookupClient;

pub struct GrpcIdentityLookup {
    endpoint: Endpoint,
}

impl GrpcIdentityLookup {
    /// `endpoint` is a host:port pair from configuration.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, BrokerError> {
        let endpoint = Endpoint::from_shared(format!("http://{endpoint}"))
            .map_err(|e| BrokerError::Config(format!("invalid validation endpoint: {e}")))?
            .connect_timeout(timeout)
            .timeout(timeout);
        Ok(Self { endpoint })
    }
}

#[async_trait]
impl IdentityLookup for GrpcIdentityLookup {
    async fn lookup_by_address(&self, ip: IpAddr) -> Result<Option<AppId>, BrokerError> {
        let channel = self.endpoint.connect().await.map_err(|e| {
            BrokerError::IdentityUnresolved(format!("validation service unreachable: {e}"))
        })?;

        let mut client = IdentityLookupClient::new(channel);
        let response = client
            .lookup_by_address(pb::AddressLookupRequest {
                ip_address: ip.to_string(),
            })
            .await
            .map_err(|status| {
                BrokerError::IdentityUnresolved(format!("validation lookup failed: {status}"))
            })?;

        let app_id = response.into_inner().app_id;
        Ok((!app_id.is_empty()).then(|| AppId::from(app_id)))
    }
}
