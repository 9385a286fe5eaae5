//! Authentication request and response messages.

use bytes::BufMut;
use uuid::Uuid;

use memgrid_core::protocol::builtin::{
    fixed, next_frame, ByteArrayCodec, ListMultiFrameCodec, NullableCodec, StringCodec,
};
use memgrid_core::protocol::{
    ClientMessage, BOOLEAN_SIZE, BYTE_SIZE, CLIENT_AUTHENTICATION, CLIENT_AUTHENTICATION_CUSTOM,
    CLIENT_AUTHENTICATION_CUSTOM_RESPONSE, CLIENT_AUTHENTICATION_RESPONSE, INT_SIZE,
    REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE, UUID_SIZE,
};
use memgrid_core::{GridError, Result};

use super::custom::AddressCodec;
use crate::config::Credentials;
use crate::connection::Address;

/// Serialization version this client speaks.
pub const SERIALIZATION_VERSION: u8 = 1;

/// Client type tag sent during authentication.
pub const CLIENT_TYPE: &str = "RST";

/// Client version sent during authentication.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

const REQUEST_UUID_OFFSET: usize = REQUEST_HEADER_SIZE;
const REQUEST_SERIALIZATION_VERSION_OFFSET: usize = REQUEST_UUID_OFFSET + UUID_SIZE;
const REQUEST_INITIAL_FRAME_SIZE: usize = REQUEST_SERIALIZATION_VERSION_OFFSET + BYTE_SIZE;

const RESPONSE_STATUS_OFFSET: usize = RESPONSE_HEADER_SIZE;
const RESPONSE_MEMBER_UUID_OFFSET: usize = RESPONSE_STATUS_OFFSET + BYTE_SIZE;
const RESPONSE_SERIALIZATION_VERSION_OFFSET: usize = RESPONSE_MEMBER_UUID_OFFSET + UUID_SIZE;
const RESPONSE_PARTITION_COUNT_OFFSET: usize = RESPONSE_SERIALIZATION_VERSION_OFFSET + BYTE_SIZE;
const RESPONSE_CLUSTER_ID_OFFSET: usize = RESPONSE_PARTITION_COUNT_OFFSET + INT_SIZE;
const RESPONSE_FAILOVER_SUPPORTED_OFFSET: usize = RESPONSE_CLUSTER_ID_OFFSET + UUID_SIZE;
const RESPONSE_INITIAL_FRAME_SIZE: usize = RESPONSE_FAILOVER_SUPPORTED_OFFSET + BOOLEAN_SIZE;

/// Outcome of an authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AuthenticationStatus {
    /// The client is authenticated.
    Authenticated = 0,
    /// The credentials were rejected.
    CredentialsFailed = 1,
    /// The member does not speak the client's serialization version.
    SerializationVersionMismatch = 2,
    /// The client is not allowed in this cluster.
    NotAllowedInCluster = 3,
}

impl AuthenticationStatus {
    /// Creates a status from its wire value.
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Authenticated),
            1 => Some(Self::CredentialsFailed),
            2 => Some(Self::SerializationVersionMismatch),
            3 => Some(Self::NotAllowedInCluster),
            _ => None,
        }
    }

    /// Returns the wire value.
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Fields of an authentication request.
#[derive(Debug, Clone)]
pub struct AuthenticationRequest {
    /// Name of the cluster the client wants to join.
    pub cluster_name: String,
    /// Credentials, if configured.
    pub credentials: Option<Credentials>,
    /// UUID of this client instance.
    pub client_uuid: Uuid,
    /// Name of this client instance.
    pub client_name: String,
    /// Labels of this client instance.
    pub labels: Vec<String>,
}

/// Request fields as seen by a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAuthenticationRequest {
    /// Requested cluster name.
    pub cluster_name: String,
    /// Username, for the username/password variant.
    pub username: Option<String>,
    /// Opaque credentials, for the custom variant.
    pub credentials: Option<Vec<u8>>,
    /// Client UUID.
    pub client_uuid: Option<Uuid>,
    /// Client type tag.
    pub client_type: String,
    /// Client serialization version.
    pub serialization_version: u8,
    /// Client version string.
    pub client_version: String,
    /// Client name.
    pub client_name: String,
    /// Client labels.
    pub labels: Vec<String>,
}

/// Fields of an authentication response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResponse {
    /// Authentication outcome.
    pub status: AuthenticationStatus,
    /// Address of the member that answered.
    pub address: Option<Address>,
    /// UUID of the member that answered.
    pub member_uuid: Option<Uuid>,
    /// Serialization version of the member.
    pub serialization_version: u8,
    /// Version of the member software.
    pub server_version: String,
    /// Number of partitions in the cluster.
    pub partition_count: i32,
    /// Identifier of the cluster; changes when the cluster restarts.
    pub cluster_id: Option<Uuid>,
    /// Whether the member supports client failover.
    pub failover_supported: bool,
}

impl AuthenticationResponse {
    /// A successful response with the given identity.
    pub fn authenticated(
        address: Address,
        member_uuid: Uuid,
        cluster_id: Uuid,
        partition_count: i32,
    ) -> Self {
        Self {
            status: AuthenticationStatus::Authenticated,
            address: Some(address),
            member_uuid: Some(member_uuid),
            serialization_version: SERIALIZATION_VERSION,
            server_version: "5.3.0".to_string(),
            partition_count,
            cluster_id: Some(cluster_id),
            failover_supported: true,
        }
    }

    /// A rejection with `status`.
    pub fn rejected(status: AuthenticationStatus) -> Self {
        Self {
            status,
            address: None,
            member_uuid: None,
            serialization_version: SERIALIZATION_VERSION,
            server_version: "5.3.0".to_string(),
            partition_count: 0,
            cluster_id: None,
            failover_supported: false,
        }
    }
}

/// Codec for the authentication exchange.
///
/// Username/password credentials use the standard message; token and custom
/// credentials travel as an opaque byte array in the custom variant.
pub struct ClientAuthenticationCodec;

impl ClientAuthenticationCodec {
    /// Encodes `request`.
    pub fn encode_request(request: &AuthenticationRequest) -> ClientMessage {
        let (message_type, payload) = match &request.credentials {
            Some(Credentials::Token(bytes)) | Some(Credentials::Custom(bytes)) => {
                (CLIENT_AUTHENTICATION_CUSTOM, Some(bytes.as_slice()))
            }
            _ => (CLIENT_AUTHENTICATION, None),
        };

        let mut message = ClientMessage::create_for_encode_any_partition(message_type);
        message.set_retryable(true);
        if let Some(initial) = message.initial_frame_mut() {
            fixed::put_uuid(&mut initial.content, Some(request.client_uuid));
            initial.content.put_u8(SERIALIZATION_VERSION);
        }

        StringCodec::encode(&mut message, &request.cluster_name);
        match payload {
            Some(bytes) => ByteArrayCodec::encode(&mut message, bytes),
            None => {
                let (username, password) = match &request.credentials {
                    Some(Credentials::UsernamePassword { username, password }) => {
                        (Some(username.as_str()), Some(password.as_str()))
                    }
                    _ => (None, None),
                };
                NullableCodec::encode(&mut message, username, StringCodec::encode);
                NullableCodec::encode(&mut message, password, StringCodec::encode);
            }
        }
        StringCodec::encode(&mut message, CLIENT_TYPE);
        StringCodec::encode(&mut message, CLIENT_VERSION);
        StringCodec::encode(&mut message, &request.client_name);
        ListMultiFrameCodec::encode(&mut message, &request.labels, |message, label| {
            StringCodec::encode(message, label)
        });
        message
    }

    /// Decodes an authentication request on the member side.
    pub fn decode_request(message: &ClientMessage) -> Result<DecodedAuthenticationRequest> {
        let custom = match message.message_type() {
            Some(CLIENT_AUTHENTICATION) => false,
            Some(CLIENT_AUTHENTICATION_CUSTOM) => true,
            other => {
                return Err(GridError::Protocol(format!(
                    "not an authentication request: {:?}",
                    other
                )))
            }
        };

        let mut iter = message.frame_iter();
        let initial = next_frame(&mut iter, "authentication request")?;
        let client_uuid = fixed::read_uuid(&initial.content, REQUEST_UUID_OFFSET)?;
        let serialization_version =
            fixed::read_u8(&initial.content, REQUEST_SERIALIZATION_VERSION_OFFSET)?;

        let cluster_name = StringCodec::decode(&mut iter)?;
        let (username, credentials) = if custom {
            (None, Some(ByteArrayCodec::decode(&mut iter)?))
        } else {
            let username = NullableCodec::decode(&mut iter, StringCodec::decode)?;
            NullableCodec::decode(&mut iter, StringCodec::decode)?;
            (username, None)
        };

        Ok(DecodedAuthenticationRequest {
            cluster_name,
            username,
            credentials,
            client_uuid,
            client_type: StringCodec::decode(&mut iter)?,
            serialization_version,
            client_version: StringCodec::decode(&mut iter)?,
            client_name: StringCodec::decode(&mut iter)?,
            labels: ListMultiFrameCodec::decode(&mut iter, StringCodec::decode)?,
        })
    }

    /// Encodes a response to the request with `correlation_id`.
    pub fn encode_response(
        response: &AuthenticationResponse,
        correlation_id: i64,
        custom: bool,
    ) -> ClientMessage {
        let message_type = if custom {
            CLIENT_AUTHENTICATION_CUSTOM_RESPONSE
        } else {
            CLIENT_AUTHENTICATION_RESPONSE
        };
        let mut message = ClientMessage::create_for_response(message_type, correlation_id);
        if let Some(initial) = message.initial_frame_mut() {
            initial.content.put_u8(response.status.value());
            fixed::put_uuid(&mut initial.content, response.member_uuid);
            initial.content.put_u8(response.serialization_version);
            initial.content.put_i32_le(response.partition_count);
            fixed::put_uuid(&mut initial.content, response.cluster_id);
            fixed::put_bool(&mut initial.content, response.failover_supported);
        }
        NullableCodec::encode(&mut message, response.address.as_ref(), AddressCodec::encode);
        StringCodec::encode(&mut message, &response.server_version);
        message
    }

    /// Decodes an authentication response of either variant.
    pub fn decode_response(message: &ClientMessage) -> Result<AuthenticationResponse> {
        match message.message_type() {
            Some(CLIENT_AUTHENTICATION_RESPONSE) | Some(CLIENT_AUTHENTICATION_CUSTOM_RESPONSE) => {}
            other => {
                return Err(GridError::Protocol(format!(
                    "unexpected authentication response type {:?}",
                    other
                )))
            }
        }

        let mut iter = message.frame_iter();
        let initial = next_frame(&mut iter, "authentication response")?;
        if initial.content.len() < RESPONSE_INITIAL_FRAME_SIZE {
            return Err(GridError::Protocol(format!(
                "authentication response header has {} bytes, expected {}",
                initial.content.len(),
                RESPONSE_INITIAL_FRAME_SIZE
            )));
        }

        let raw_status = fixed::read_u8(&initial.content, RESPONSE_STATUS_OFFSET)?;
        let status = AuthenticationStatus::from_value(raw_status).ok_or_else(|| {
            GridError::Protocol(format!("unknown authentication status {}", raw_status))
        })?;

        Ok(AuthenticationResponse {
            status,
            member_uuid: fixed::read_uuid(&initial.content, RESPONSE_MEMBER_UUID_OFFSET)?,
            serialization_version: fixed::read_u8(
                &initial.content,
                RESPONSE_SERIALIZATION_VERSION_OFFSET,
            )?,
            partition_count: fixed::read_i32(&initial.content, RESPONSE_PARTITION_COUNT_OFFSET)?,
            cluster_id: fixed::read_uuid(&initial.content, RESPONSE_CLUSTER_ID_OFFSET)?,
            failover_supported: fixed::read_bool(
                &initial.content,
                RESPONSE_FAILOVER_SUPPORTED_OFFSET,
            )?,
            address: NullableCodec::decode(&mut iter, AddressCodec::decode)?,
            server_version: StringCodec::decode(&mut iter)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(credentials: Option<Credentials>) -> AuthenticationRequest {
        AuthenticationRequest {
            cluster_name: "dev".to_string(),
            credentials,
            client_uuid: Uuid::new_v4(),
            client_name: "memgrid_client_1".to_string(),
            labels: vec!["blue".to_string(), "edge".to_string()],
        }
    }

    #[test]
    fn test_username_password_request_layout() {
        let request = request(Some(Credentials::UsernamePassword {
            username: "admin".to_string(),
            password: "secret".to_string(),
        }));
        let message = ClientAuthenticationCodec::encode_request(&request);

        assert_eq!(message.message_type(), Some(CLIENT_AUTHENTICATION));
        assert!(message.is_retryable());
        let initial = message.initial_frame().unwrap();
        assert_eq!(initial.content.len(), REQUEST_INITIAL_FRAME_SIZE);

        let decoded = ClientAuthenticationCodec::decode_request(&message).unwrap();
        assert_eq!(decoded.cluster_name, "dev");
        assert_eq!(decoded.username.as_deref(), Some("admin"));
        assert_eq!(decoded.credentials, None);
        assert_eq!(decoded.client_uuid, Some(request.client_uuid));
        assert_eq!(decoded.client_type, CLIENT_TYPE);
        assert_eq!(decoded.serialization_version, SERIALIZATION_VERSION);
        assert_eq!(decoded.client_version, CLIENT_VERSION);
        assert_eq!(decoded.client_name, "memgrid_client_1");
        assert_eq!(decoded.labels, request.labels);
    }

    #[test]
    fn test_token_uses_custom_variant() {
        let message =
            ClientAuthenticationCodec::encode_request(&request(Some(Credentials::Token(b"tok".to_vec()))));
        assert_eq!(message.message_type(), Some(CLIENT_AUTHENTICATION_CUSTOM));

        let decoded = ClientAuthenticationCodec::decode_request(&message).unwrap();
        assert_eq!(decoded.credentials.as_deref(), Some(&b"tok"[..]));
        assert!(decoded.username.is_none());
    }

    #[test]
    fn test_no_credentials_sends_null_username() {
        let message = ClientAuthenticationCodec::encode_request(&request(None));
        let decoded = ClientAuthenticationCodec::decode_request(&message).unwrap();
        assert!(decoded.username.is_none());
        assert!(decoded.credentials.is_none());
    }

    #[test]
    fn test_response_decoding() {
        let response = AuthenticationResponse::authenticated(
            Address::new("127.0.0.1", 5701),
            Uuid::new_v4(),
            Uuid::new_v4(),
            271,
        );
        let message = ClientAuthenticationCodec::encode_response(&response, 42, false);
        assert_eq!(message.correlation_id(), Some(42));
        assert_eq!(
            message.initial_frame().unwrap().content.len(),
            RESPONSE_INITIAL_FRAME_SIZE
        );

        assert_eq!(
            ClientAuthenticationCodec::decode_response(&message).unwrap(),
            response
        );
    }

    #[test]
    fn test_rejection_decoding() {
        let response = AuthenticationResponse::rejected(AuthenticationStatus::NotAllowedInCluster);
        let message = ClientAuthenticationCodec::encode_response(&response, 7, true);
        let decoded = ClientAuthenticationCodec::decode_response(&message).unwrap();

        assert_eq!(decoded.status, AuthenticationStatus::NotAllowedInCluster);
        assert!(decoded.address.is_none());
        assert!(decoded.cluster_id.is_none());
    }

    #[test]
    fn test_unknown_status_is_protocol_error() {
        let mut message = ClientAuthenticationCodec::encode_response(
            &AuthenticationResponse::rejected(AuthenticationStatus::CredentialsFailed),
            1,
            false,
        );
        message.initial_frame_mut().unwrap().content[RESPONSE_STATUS_OFFSET] = 9;
        assert!(matches!(
            ClientAuthenticationCodec::decode_response(&message),
            Err(GridError::Protocol(_))
        ));
    }
}
