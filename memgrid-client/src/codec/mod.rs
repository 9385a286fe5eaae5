//! Encoders and decoders for the control-plane messages the client sends
//! and receives on its own behalf.
//!
//! Each codec also exposes the member-side half of its exchange so a test
//! member can be built from the same definitions.

mod authentication;
mod cluster_view;
pub mod custom;
mod error;
mod ping;

pub use authentication::{
    AuthenticationRequest, AuthenticationResponse, AuthenticationStatus,
    ClientAuthenticationCodec, DecodedAuthenticationRequest, CLIENT_TYPE, CLIENT_VERSION,
    SERIALIZATION_VERSION,
};
pub use cluster_view::{ClientAddClusterViewListenerCodec, ClusterViewEvent};
pub use error::ErrorsCodec;
pub use ping::ClientPingCodec;
