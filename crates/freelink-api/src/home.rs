// Home-automation endpoints
//
// Node listing plus endpoint value read/write. Shutters, alarm panels,
// and security-pack sensors are all nodes whose state lives in `signal`
// endpoints and whose commands are `slot` endpoints.

use serde_json::json;

use crate::client::FreeboxClient;
use crate::error::Error;
use crate::models::{EndpointValue, HomeNode};

impl FreeboxClient {
    /// List all home-automation nodes known to the gateway.
    pub async fn list_home_nodes(&self) -> Result<Vec<HomeNode>, Error> {
        let nodes: Option<Vec<HomeNode>> = self.get("home/nodes").await?;
        Ok(nodes.unwrap_or_default())
    }

    /// Read the current value of one node endpoint.
    pub async fn get_endpoint_value(
        &self,
        node_id: u32,
        endpoint_id: u32,
    ) -> Result<EndpointValue, Error> {
        self.get(&format!("home/endpoints/{node_id}/{endpoint_id}"))
            .await
    }

    /// Write a value to a node's slot endpoint (e.g. a shutter's
    /// `position_set`, or `null` for trigger slots like `stop`).
    pub async fn set_endpoint_value(
        &self,
        node_id: u32,
        endpoint_id: u32,
        value: serde_json::Value,
    ) -> Result<(), Error> {
        let _ack: serde_json::Value = self
            .put(
                &format!("home/endpoints/{node_id}/{endpoint_id}"),
                json!({ "value": value }),
            )
            .await?;
        Ok(())
    }
}
