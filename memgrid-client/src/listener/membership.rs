//! Cluster members and membership change events.

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

use crate::connection::Address;

/// Protocol endpoint kinds a member may expose an address for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ProtocolType {
    /// Member-to-member traffic.
    Member = 0,
    /// Client traffic.
    Client = 1,
    /// WAN replication traffic.
    Wan = 2,
    /// REST endpoint.
    Rest = 3,
    /// Memcache endpoint.
    Memcache = 4,
}

impl ProtocolType {
    /// Creates a protocol type from its wire format value.
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Member),
            1 => Some(Self::Client),
            2 => Some(Self::Wan),
            3 => Some(Self::Rest),
            4 => Some(Self::Memcache),
            _ => None,
        }
    }

    /// Returns the wire format value.
    pub fn value(self) -> i32 {
        self as i32
    }
}

/// Key of a member's address map: a protocol plus an optional identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointQualifier {
    /// Protocol served at the address.
    pub protocol_type: ProtocolType,
    /// Identifier distinguishing several endpoints of one protocol.
    pub identifier: Option<String>,
}

impl EndpointQualifier {
    /// Identifier used for addresses reachable from outside the member's network.
    pub const PUBLIC_IDENTIFIER: &'static str = "public";

    /// Creates a qualifier.
    pub fn new(protocol_type: ProtocolType, identifier: Option<String>) -> Self {
        Self {
            protocol_type,
            identifier,
        }
    }

    /// Qualifier of the client-facing public address.
    pub fn client_public() -> Self {
        Self::new(
            ProtocolType::Client,
            Some(Self::PUBLIC_IDENTIFIER.to_string()),
        )
    }
}

/// Version of the software a member runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct MemberVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
}

impl MemberVersion {
    /// Creates a version.
    pub fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for MemberVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A member of the cluster as reported by the latest member list.
///
/// Members are replaced wholesale when a new member list arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    uuid: Uuid,
    address: Address,
    lite_member: bool,
    attributes: HashMap<String, String>,
    version: MemberVersion,
    address_map: HashMap<EndpointQualifier, Address>,
}

impl Member {
    /// Creates a data member with no attributes and no extra endpoints.
    pub fn new(uuid: Uuid, address: Address) -> Self {
        Self {
            uuid,
            address,
            lite_member: false,
            attributes: HashMap::new(),
            version: MemberVersion::default(),
            address_map: HashMap::new(),
        }
    }

    /// Creates a member with every field given.
    pub fn with_details(
        uuid: Uuid,
        address: Address,
        lite_member: bool,
        attributes: HashMap<String, String>,
        version: MemberVersion,
        address_map: HashMap<EndpointQualifier, Address>,
    ) -> Self {
        Self {
            uuid,
            address,
            lite_member,
            attributes,
            version,
            address_map,
        }
    }

    /// Returns the member's UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the member's internal address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Returns whether this is a lite member.
    pub fn is_lite_member(&self) -> bool {
        self.lite_member
    }

    /// Returns the member's attributes.
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Returns the member's version.
    pub fn version(&self) -> MemberVersion {
        self.version
    }

    /// Returns all advertised endpoints.
    pub fn address_map(&self) -> &HashMap<EndpointQualifier, Address> {
        &self.address_map
    }

    /// Returns the client-facing public address, if the member advertises one.
    pub fn public_address(&self) -> Option<&Address> {
        self.address_map.get(&EndpointQualifier::client_public())
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Member[uuid={}, address={}", self.uuid, self.address)?;
        if self.lite_member {
            write!(f, ", lite")?;
        }
        write!(f, "]")
    }
}

/// Type of membership event fired when cluster topology changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberEventType {
    /// A new member joined the cluster.
    Added,
    /// A member left the cluster.
    Removed,
}

impl fmt::Display for MemberEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "ADDED"),
            Self::Removed => write!(f, "REMOVED"),
        }
    }
}

/// An event fired when a cluster member joins or leaves.
#[derive(Debug, Clone)]
pub struct MemberEvent {
    /// The member that triggered the event.
    pub member: Member,
    /// The type of membership change.
    pub event_type: MemberEventType,
}

impl MemberEvent {
    /// Creates an event for a member that joined the cluster.
    pub fn member_added(member: Member) -> Self {
        Self {
            member,
            event_type: MemberEventType::Added,
        }
    }

    /// Creates an event for a member that left the cluster.
    pub fn member_removed(member: Member) -> Self {
        Self {
            member,
            event_type: MemberEventType::Removed,
        }
    }
}

impl fmt::Display for MemberEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemberEvent[{} {}]", self.member, self.event_type)
    }
}
