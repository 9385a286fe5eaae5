//! Codecs for the composite types carried by control-plane messages.

use std::collections::HashMap;

use bytes::BufMut;

use memgrid_core::protocol::builtin::{
    fast_forward_to_end_frame, fixed, next_frame, ListMultiFrameCodec, MapCodec, NullableCodec,
    StringCodec,
};
use memgrid_core::protocol::{ClientMessage, Frame, FrameIter, DEFAULT_FLAGS, INT_SIZE, UUID_SIZE};
use memgrid_core::{GridError, RemoteError, Result, StackTraceElement};

use crate::connection::Address;
use crate::listener::{EndpointQualifier, Member, MemberVersion, ProtocolType};

fn begin_struct(iter: &mut FrameIter<'_>, what: &str) -> Result<()> {
    let frame = next_frame(iter, what)?;
    if !frame.is_begin_frame() {
        return Err(GridError::Protocol(format!(
            "{} does not start with a begin frame",
            what
        )));
    }
    Ok(())
}

/// `Address`: port in the initial frame, then the host.
pub struct AddressCodec;

impl AddressCodec {
    /// Appends `address`.
    pub fn encode(message: &mut ClientMessage, address: &Address) {
        message.add_frame(Frame::new_begin_frame());
        let mut initial = Frame::with_capacity(INT_SIZE, DEFAULT_FLAGS);
        initial.content.put_i32_le(i32::from(address.port()));
        message.add_frame(initial);
        StringCodec::encode(message, address.host());
        message.add_frame(Frame::new_end_frame());
    }

    /// Decodes an address.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<Address> {
        begin_struct(iter, "address")?;
        let initial = next_frame(iter, "address")?;
        let port = fixed::read_i32(&initial.content, 0)?;
        let port = u16::try_from(port)
            .map_err(|_| GridError::Protocol(format!("invalid port {} in address", port)))?;
        let host = StringCodec::decode(iter)?;
        fast_forward_to_end_frame(iter)?;
        Ok(Address::new(host, port))
    }
}

/// `MemberVersion`: three bytes in the initial frame.
pub struct MemberVersionCodec;

impl MemberVersionCodec {
    /// Appends `version`.
    pub fn encode(message: &mut ClientMessage, version: MemberVersion) {
        message.add_frame(Frame::new_begin_frame());
        let mut initial = Frame::with_capacity(3, DEFAULT_FLAGS);
        initial.content.put_u8(version.major);
        initial.content.put_u8(version.minor);
        initial.content.put_u8(version.patch);
        message.add_frame(initial);
        message.add_frame(Frame::new_end_frame());
    }

    /// Decodes a member version.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<MemberVersion> {
        begin_struct(iter, "member version")?;
        let initial = next_frame(iter, "member version")?;
        let version = MemberVersion::new(
            fixed::read_u8(&initial.content, 0)?,
            fixed::read_u8(&initial.content, 1)?,
            fixed::read_u8(&initial.content, 2)?,
        );
        fast_forward_to_end_frame(iter)?;
        Ok(version)
    }
}

/// `EndpointQualifier`: protocol type and an optional identifier.
pub struct EndpointQualifierCodec;

impl EndpointQualifierCodec {
    /// Appends `qualifier`.
    pub fn encode(message: &mut ClientMessage, qualifier: &EndpointQualifier) {
        message.add_frame(Frame::new_begin_frame());
        let mut initial = Frame::with_capacity(INT_SIZE, DEFAULT_FLAGS);
        initial.content.put_i32_le(qualifier.protocol_type.value());
        message.add_frame(initial);
        NullableCodec::encode(message, qualifier.identifier.as_deref(), StringCodec::encode);
        message.add_frame(Frame::new_end_frame());
    }

    /// Decodes a qualifier.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<EndpointQualifier> {
        begin_struct(iter, "endpoint qualifier")?;
        let initial = next_frame(iter, "endpoint qualifier")?;
        let raw_type = fixed::read_i32(&initial.content, 0)?;
        let protocol_type = ProtocolType::from_value(raw_type).ok_or_else(|| {
            GridError::Protocol(format!("unknown protocol type {}", raw_type))
        })?;
        let identifier = NullableCodec::decode(iter, StringCodec::decode)?;
        fast_forward_to_end_frame(iter)?;
        Ok(EndpointQualifier::new(protocol_type, identifier))
    }
}

/// `MemberInfo`: a member as listed in a members view event.
pub struct MemberInfoCodec;

impl MemberInfoCodec {
    /// Appends `member`.
    pub fn encode(message: &mut ClientMessage, member: &Member) {
        message.add_frame(Frame::new_begin_frame());
        let mut initial = Frame::with_capacity(UUID_SIZE + 1, DEFAULT_FLAGS);
        fixed::put_uuid(&mut initial.content, Some(member.uuid()));
        fixed::put_bool(&mut initial.content, member.is_lite_member());
        message.add_frame(initial);

        AddressCodec::encode(message, member.address());
        MapCodec::encode(
            message,
            member.attributes(),
            |message, key| StringCodec::encode(message, key),
            |message, value| StringCodec::encode(message, value),
        );
        MemberVersionCodec::encode(message, member.version());
        MapCodec::encode(
            message,
            member.address_map(),
            EndpointQualifierCodec::encode,
            AddressCodec::encode,
        );
        message.add_frame(Frame::new_end_frame());
    }

    /// Decodes a member.
    ///
    /// The address map is optional on the wire; older members omit it.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<Member> {
        begin_struct(iter, "member info")?;
        let initial = next_frame(iter, "member info")?;
        let uuid = fixed::read_uuid(&initial.content, 0)?
            .ok_or_else(|| GridError::Protocol("member info without uuid".into()))?;
        let lite_member = fixed::read_bool(&initial.content, UUID_SIZE)?;

        let address = AddressCodec::decode(iter)?;
        let attributes: HashMap<String, String> =
            MapCodec::decode(iter, StringCodec::decode, StringCodec::decode)?
                .into_iter()
                .collect();
        let version = MemberVersionCodec::decode(iter)?;
        let address_map: HashMap<EndpointQualifier, Address> =
            if iter.peek().is_some_and(|frame| !frame.is_end_frame()) {
                MapCodec::decode(iter, EndpointQualifierCodec::decode, AddressCodec::decode)?
                    .into_iter()
                    .collect()
            } else {
                HashMap::new()
            };
        fast_forward_to_end_frame(iter)?;

        Ok(Member::with_details(
            uuid,
            address,
            lite_member,
            attributes,
            version,
            address_map,
        ))
    }
}

/// `StackTraceElement` of a remote error.
pub struct StackTraceElementCodec;

impl StackTraceElementCodec {
    /// Appends `element`.
    pub fn encode(message: &mut ClientMessage, element: &StackTraceElement) {
        message.add_frame(Frame::new_begin_frame());
        let mut initial = Frame::with_capacity(INT_SIZE, DEFAULT_FLAGS);
        initial.content.put_i32_le(element.line_number);
        message.add_frame(initial);
        StringCodec::encode(message, &element.class_name);
        StringCodec::encode(message, &element.method_name);
        NullableCodec::encode(message, element.file_name.as_deref(), StringCodec::encode);
        message.add_frame(Frame::new_end_frame());
    }

    /// Decodes a stack trace element.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<StackTraceElement> {
        begin_struct(iter, "stack trace element")?;
        let initial = next_frame(iter, "stack trace element")?;
        let line_number = fixed::read_i32(&initial.content, 0)?;
        let class_name = StringCodec::decode(iter)?;
        let method_name = StringCodec::decode(iter)?;
        let file_name = NullableCodec::decode(iter, StringCodec::decode)?;
        fast_forward_to_end_frame(iter)?;
        Ok(StackTraceElement {
            class_name,
            method_name,
            file_name,
            line_number,
        })
    }
}

/// `ErrorHolder`: one exception in the cause chain of an error response.
pub struct ErrorHolderCodec;

impl ErrorHolderCodec {
    /// Appends `error`.
    pub fn encode(message: &mut ClientMessage, error: &RemoteError) {
        message.add_frame(Frame::new_begin_frame());
        let mut initial = Frame::with_capacity(INT_SIZE, DEFAULT_FLAGS);
        initial.content.put_i32_le(error.error_code);
        message.add_frame(initial);
        StringCodec::encode(message, &error.class_name);
        NullableCodec::encode(message, error.message.as_deref(), StringCodec::encode);
        ListMultiFrameCodec::encode(message, &error.stack_trace, StackTraceElementCodec::encode);
        message.add_frame(Frame::new_end_frame());
    }

    /// Decodes one error holder.
    pub fn decode(iter: &mut FrameIter<'_>) -> Result<RemoteError> {
        begin_struct(iter, "error holder")?;
        let initial = next_frame(iter, "error holder")?;
        let error_code = fixed::read_i32(&initial.content, 0)?;
        let class_name = StringCodec::decode(iter)?;
        let message = NullableCodec::decode(iter, StringCodec::decode)?;
        let stack_trace = ListMultiFrameCodec::decode(iter, StackTraceElementCodec::decode)?;
        fast_forward_to_end_frame(iter)?;
        Ok(RemoteError {
            error_code,
            class_name,
            message,
            stack_trace,
        })
    }
}
