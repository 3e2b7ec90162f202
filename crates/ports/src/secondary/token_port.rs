use domain::connection::entity::AuthInfo;
use domain::connection::error::TokenError;
use domain::policy::tags::TagStore;
use domain::pucontext::context::PuContext;

/// Tag key under which a transmitter advertises its own context ID inside
/// the claim bag.
pub const TRANSMITTER_LABEL: &str = "@transmitter:id";

/// Claims recovered from a peer's packet token.
#[derive(Debug, Clone)]
pub struct ConnectionClaims {
    pub tags: TagStore,
}

impl ConnectionClaims {
    /// The peer's advertised context ID, when present.
    pub fn transmitter_label(&self) -> Option<&str> {
        self.tags.get(TRANSMITTER_LABEL)
    }
}

/// Creates and verifies the signed tokens exchanged in-band during the
/// handshake. Certificate and key management live behind this boundary.
///
/// The create methods fill in the connection's `AuthInfo` (local nonce and
/// context IDs) as a side effect; the parse methods record the remote side.
/// `parse_ack_token` only proves liveness: it verifies the signature over
/// both nonces without re-deriving claims.
pub trait TokenAccessor: Send + Sync {
    fn create_syn_token(
        &self,
        context: &PuContext,
        auth: &mut AuthInfo,
    ) -> Result<Vec<u8>, TokenError>;

    fn create_synack_token(
        &self,
        context: &PuContext,
        auth: &mut AuthInfo,
    ) -> Result<Vec<u8>, TokenError>;

    fn create_ack_token(
        &self,
        context: &PuContext,
        auth: &mut AuthInfo,
    ) -> Result<Vec<u8>, TokenError>;

    fn parse_packet_token(
        &self,
        auth: &mut AuthInfo,
        data: &[u8],
    ) -> Result<ConnectionClaims, TokenError>;

    fn parse_ack_token(&self, auth: &mut AuthInfo, data: &[u8]) -> Result<(), TokenError>;
}
