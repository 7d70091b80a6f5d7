//! Client cache manager (C8): the entry point an application calls instead
//! of running its operator graph directly. When caching is enabled it asks
//! the index for a hit/puzzle/miss, then streams the result from wherever
//! it landed; when caching is disabled it never contacts the index at all.

use crate::config::Config;
use crate::error::{Error, NetworkError, Result};
use crate::model::{CacheCube, ForeignRef, RequestType};
use crate::net::framing::{ReadBuffer, WriteBuffer};
use crate::net::protocol::{self, magic, ClientRequest, DeliveryReply, DeliveryRequest};
use crate::node::operator::OperatorGraph;
use std::sync::Arc;
use tokio::net::TcpStream;

pub struct CacheManager {
    config: Config,
    operator: Arc<dyn OperatorGraph>,
}

impl CacheManager {
    pub fn new(config: Config, operator: Arc<dyn OperatorGraph>) -> Self {
        Self { config, operator }
    }

    /// Resolve one request, either by round-tripping through the index and
    /// streaming the result, or -- when `cache.enabled` is false -- by
    /// running the operator graph in-process with no network contact at
    /// all.
    pub async fn query(&self, request_type: RequestType, semantic_id: &str, query: CacheCube) -> Result<Vec<u8>> {
        if !self.config.cache.enabled {
            let output = self.operator.evaluate(semantic_id, &query.query).await?;
            return Ok(output.bytes);
        }

        let delivery = self.request_from_index(request_type, semantic_id, query).await?;
        self.fetch_delivery(&delivery.foreign, delivery.delivery_id).await
    }

    async fn request_from_index(
        &self,
        request_type: RequestType,
        semantic_id: &str,
        query: CacheCube,
    ) -> Result<crate::model::DeliveryResponse> {
        let mut socket = TcpStream::connect((
            self.config.indexserver.host.as_str(),
            self.config.indexserver.port_frontend,
        ))
        .await
        .map_err(NetworkError::Io)?;

        let request = ClientRequest {
            request_type,
            semantic_id: semantic_id.to_string(),
            query,
        };
        let mut wb = WriteBuffer::new();
        protocol::write_client_request(&mut wb, &request);
        wb.flush(&mut socket).await?;

        let mut rb = ReadBuffer::new(&mut socket);
        match rb.read_u8().await? {
            0 => protocol::read_delivery_response(&mut rb).await,
            _ => {
                let message = rb.read_string().await?;
                Err(Error::Worker(message))
            }
        }
    }

    async fn fetch_delivery(&self, foreign: &ForeignRef, delivery_id: uuid::Uuid) -> Result<Vec<u8>> {
        let mut socket = TcpStream::connect((foreign.host.as_str(), foreign.port))
            .await
            .map_err(NetworkError::Io)?;

        let mut wb = WriteBuffer::new();
        wb.write_u32(magic::DELIVERY);
        protocol::write_delivery_request(&mut wb, &DeliveryRequest::ByDeliveryId(delivery_id));
        wb.flush(&mut socket).await?;

        let mut rb = ReadBuffer::new(&mut socket);
        match protocol::read_delivery_reply(&mut rb).await? {
            DeliveryReply::Found(bytes) => Ok(bytes),
            DeliveryReply::NotFound => Err(Error::NotFound(format!(
                "delivery {delivery_id} not found on {}:{}",
                foreign.host, foreign.port
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Interval;
    use crate::model::{QueryCube, ResolutionInfo};
    use crate::node::operator::DeterministicOperatorGraph;

    #[tokio::test]
    async fn disabled_cache_runs_the_operator_graph_with_no_network_contact() {
        let mut config = Config::default();
        config.cache.enabled = false;
        let manager = CacheManager::new(config, Arc::new(DeterministicOperatorGraph::default()));

        let query = CacheCube::new(
            QueryCube::new(
                Interval::new(0.0, 4.0),
                Interval::new(0.0, 4.0),
                Interval::new(0.0, 1.0),
                4326,
                0,
            ),
            ResolutionInfo::raster(1.0, 1.0),
        );
        let bytes = manager.query(RequestType::Raster, "sem", query).await.unwrap();
        assert_eq!(bytes.len(), 4 * 4 * crate::node::operator::RASTER_BPP);
    }
}
