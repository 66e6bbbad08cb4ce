//! Array construction and constant folding.
//!
//! A fixed-element-type, fixed-size, all-literal array construction is
//! folded into one compact constant-data segment plus one bulk "new array
//! from data" instruction, instead of one push per element. The fold is
//! only legal when every element is the same primitive literal kind as the
//! element type; strings and null never fold.

use opal_core::ir::{Expr, PrimitiveLiteral};
use opal_core::{CodegenError, DeclKey, IrType};

use crate::instr::Instr;
use crate::repr::FieldStorage;

use super::{BodyGenerator, Result};

pub(crate) fn gen_new_array(
    g: &mut BodyGenerator<'_, '_>,
    class: DeclKey,
    elems: &[Expr],
) -> Result<()> {
    let elem_ty = g.array_elem_type(class)?;
    let storage = g.array_elem_storage(class)?;
    let array_ty = class.struct_type();
    g.fragment.array_types.reference(array_ty);

    if let Some(bytes) = fold_constant(elems, &elem_ty, storage) {
        let data = g.fragment.data.intern(bytes, storage.byte_width());
        g.emit(Instr::ArrayNewData { ty: array_ty, data });
        return Ok(());
    }

    let len = u32::try_from(elems.len()).map_err(|_| {
        CodegenError::shape(g.emitter.name(), "array literal exceeds the element limit")
    })?;
    for elem in elems {
        g.gen_with_expected(elem, &elem_ty)?;
    }
    g.emit(Instr::ArrayNewFixed { ty: array_ty, len });
    Ok(())
}

/// Encode an all-literal element list into little-endian segment bytes, or
/// `None` when any element disqualifies the fold.
fn fold_constant(elems: &[Expr], elem_ty: &IrType, storage: FieldStorage) -> Option<Vec<u8>> {
    if elems.is_empty() || matches!(storage, FieldStorage::Ref { .. }) {
        return None;
    }
    let mut bytes = Vec::with_capacity(elems.len() * storage.byte_width() as usize);
    for elem in elems {
        match elem.as_primitive_literal()? {
            PrimitiveLiteral::Int(value, ty) if ty == *elem_ty => match storage {
                FieldStorage::I8 { .. } => bytes.push(value as u8),
                FieldStorage::I16 { .. } => bytes.extend((value as i16).to_le_bytes()),
                FieldStorage::I32 => bytes.extend((value as i32).to_le_bytes()),
                FieldStorage::I64 => bytes.extend(value.to_le_bytes()),
                _ => return None,
            },
            PrimitiveLiteral::Float(value, ty) if ty == *elem_ty => match storage {
                FieldStorage::F32 => bytes.extend((value as f32).to_le_bytes()),
                FieldStorage::F64 => bytes.extend(value.to_le_bytes()),
                _ => return None,
            },
            PrimitiveLiteral::Bool(value) if *elem_ty == IrType::Bool => {
                bytes.push(u8::from(value));
            }
            _ => return None,
        }
    }
    Some(bytes)
}
