// System, connection, and storage endpoints

use crate::client::FreeboxClient;
use crate::error::Error;
use crate::models::{ConnectionStatus, StorageDisk, SystemConfig};

impl FreeboxClient {
    /// Gateway identity and hardware sensors (temperatures, fans).
    pub async fn system_config(&self) -> Result<SystemConfig, Error> {
        self.get("system/").await
    }

    /// WAN connection status and transfer rates.
    pub async fn connection_status(&self) -> Result<ConnectionStatus, Error> {
        self.get("connection/").await
    }

    /// Disks attached to the gateway. `null` on diskless models.
    pub async fn list_disks(&self) -> Result<Vec<StorageDisk>, Error> {
        let disks: Option<Vec<StorageDisk>> = self.get("storage/disk/").await?;
        Ok(disks.unwrap_or_default())
    }

    /// Reboot the gateway. Invalidates every session, including ours.
    pub async fn reboot(&self) -> Result<(), Error> {
        let _ack: serde_json::Value = self.post("system/reboot/", None).await?;
        Ok(())
    }
}
