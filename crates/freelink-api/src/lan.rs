// LAN browser endpoints

use crate::client::FreeboxClient;
use crate::error::Error;
use crate::models::LanHostEntry;

impl FreeboxClient {
    /// List the hosts known to the gateway's LAN browser.
    ///
    /// The gateway may answer with a `null` result right after boot.
    pub async fn list_lan_hosts(&self) -> Result<Vec<LanHostEntry>, Error> {
        let hosts: Option<Vec<LanHostEntry>> = self.get("lan/browser/pub/").await?;
        Ok(hosts.unwrap_or_default())
    }
}
