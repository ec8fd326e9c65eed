//! Record field access through the marshaler.
//!
//! Reads and writes one named field of a native record memory block.
//! Record-typed fields are embedded by value: reads hand out an interior
//! pointer, writes copy the field's record size into place, always without
//! ownership transfer since the memory belongs to the enclosing record.

use std::ffi::c_void;

use crate::descriptor::{FieldDesc, RecordId, Transfer, TypeDesc};
use crate::error::Result;
use crate::invoke::Bridge;
use crate::marshal::{self, MarshalError, NativeSlot};
use crate::value::HostValue;

fn field_of<'a>(
    bridge: &'a Bridge,
    record: RecordId,
    name: &str,
) -> Result<&'a FieldDesc> {
    let desc = bridge
        .catalog()
        .record(record)
        .ok_or(MarshalError::UnresolvableType { kind: "record" })?;
    Ok(desc
        .fields
        .iter()
        .find(|f| f.name == name)
        .ok_or_else(|| MarshalError::UnknownField {
            record: desc.name.clone(),
            field: name.to_string(),
        })?)
}

/// Read one field of a native record as a host value.
///
/// # Safety
/// `mem` must point to a live instance of the record's layout.
pub unsafe fn get_field(
    bridge: &Bridge,
    record: RecordId,
    name: &str,
    mem: *mut c_void,
    transfer: Transfer,
) -> Result<HostValue> {
    let field = field_of(bridge, record, name)?;
    let src = unsafe { mem.add(field.offset) };

    let (slot, transfer) = if let TypeDesc::Record(_) = &field.ty {
        // Embedded record: reference it in place, never take ownership.
        (NativeSlot::from_ptr(src), Transfer::None)
    } else {
        (
            unsafe { marshal::read_raw(src, &field.ty, bridge.catalog()) },
            transfer,
        )
    };

    Ok(
        marshal::native_to_host(bridge, &slot, &field.ty, transfer, None)?
            .unwrap_or(HostValue::Undef),
    )
}

/// Write one field of a native record from a host value.
///
/// String and container fields are stored as freshly allocated copies the
/// record's owner is responsible for.
///
/// # Safety
/// `mem` must point to a live, writable instance of the record's layout.
pub unsafe fn set_field(
    bridge: &Bridge,
    record: RecordId,
    name: &str,
    mem: *mut c_void,
    value: &HostValue,
) -> Result<()> {
    let field = field_of(bridge, record, name)?;
    let dest = unsafe { mem.add(field.offset) };

    if let TypeDesc::Record(inner) = &field.ty {
        marshal::host_record_fill(bridge, value, *inner, dest, None)?;
        return Ok(());
    }

    let slot = marshal::host_to_native(
        bridge,
        value,
        None,
        &field.ty,
        Transfer::None,
        true,
        None,
    )?;
    unsafe { marshal::write_raw(slot, dest, &field.ty, bridge.catalog()) };
    Ok(())
}
