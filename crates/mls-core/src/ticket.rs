use iroh::EndpointAddr;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Prefix that marks a string as a storage server ticket
const TICKET_PREFIX: &str = "mls";

/// Everything a client needs to reach a storage server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTicket {
    pub addr: EndpointAddr,
}

impl ServerTicket {
    pub fn new(addr: EndpointAddr) -> Self {
        Self { addr }
    }

    /// Encode as `mls` followed by lowercase unpadded base32
    pub fn encode(&self) -> Result<String> {
        let bytes = postcard::to_allocvec(self)?;
        let body = data_encoding::BASE32_NOPAD.encode(&bytes).to_lowercase();
        Ok(format!("{TICKET_PREFIX}{body}"))
    }

    /// Parse a ticket, ignoring case and surrounding whitespace
    pub fn decode(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        let body = s
            .strip_prefix(TICKET_PREFIX)
            .ok_or_else(|| Error::InvalidTicket(format!("missing `{TICKET_PREFIX}` prefix")))?;

        let bytes = data_encoding::BASE32_NOPAD
            .decode(body.to_uppercase().as_bytes())
            .map_err(|e| Error::InvalidTicket(format!("invalid base32: {}", e)))?;

        postcard::from_bytes(&bytes)
            .map_err(|e| Error::InvalidTicket(format!("invalid ticket data: {}", e)))
    }
}

impl std::str::FromStr for ServerTicket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}
