//! Data-emitting pseudo-ops.

use super::{check_garbages_at_end, get_absolute_value_arg, skip_comma};
use crate::asm::Assembler;
use crate::error::TryStatus;
use crate::expr::ExprTarget;
use crate::parse_utils::skip_spaces;
use gcn_types::{bytes as le, ABS_SECTION};

fn writeable_section(asm: &mut Assembler, stmt_place: usize) -> bool {
    asm.initialize_output_format();
    if !asm.is_writeable_section() {
        asm.print_error(stmt_place, "Writing data into non-writeable section is illegal");
        return false;
    }
    true
}

/// `.byte`, `.short`, `.int`/`.long`, `.quad`: comma-separated
/// expressions emitted little-endian.
pub fn put_integers(asm: &mut Assembler, stmt_place: usize, pos: &mut usize, size: u8) {
    if !writeable_section(asm, stmt_place) {
        return;
    }
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    if *pos == bytes.len() {
        return;
    }
    loop {
        skip_spaces(bytes, pos);
        let expr_place = *pos;
        if *pos < bytes.len() && bytes[*pos] != b',' {
            match asm.parse_expr(pos, false, false) {
                Some(expr_id) => {
                    if asm.exprs[expr_id].ops.is_empty() {
                        // empty expression: nothing emitted
                    } else if asm.exprs[expr_id].sym_occurs_num == 0 {
                        let (status, value, section_id) = asm.evaluate_expr_id(expr_id);
                        match status {
                            TryStatus::Success => {
                                if section_id != ABS_SECTION {
                                    let p = asm.get_source_pos(expr_place);
                                    asm.print_error_at(
                                        &p,
                                        "Relative value is illegal in data expressions",
                                    );
                                } else {
                                    if size < 8 {
                                        let p = asm.get_source_pos(expr_place);
                                        asm.print_warning_for_range(
                                            u32::from(size) * 8,
                                            value,
                                            &p,
                                        );
                                    }
                                    let mut buf = [0u8; 8];
                                    le::write_u64(&mut buf, 0, value);
                                    asm.put_data(&buf[..size as usize]);
                                }
                            }
                            TryStatus::TryLater => {
                                let offset = asm.reserve_data(size as usize) ;
                                let section = asm.current_section;
                                asm.exprs[expr_id].target =
                                    ExprTarget::Data { section, offset, size };
                                asm.uneval_expressions.push(expr_id);
                            }
                            TryStatus::Failed => {}
                        }
                    } else {
                        // forward reference: reserve the slot now
                        let offset = asm.reserve_data(size as usize);
                        let section = asm.current_section;
                        asm.exprs[expr_id].target = ExprTarget::Data { section, offset, size };
                    }
                }
                None => {}
            }
        }
        match skip_comma(asm, pos) {
            Some(true) => continue,
            Some(false) => break,
            None => return,
        }
    }
}

/// `.octa`: 128-bit literals.
pub fn put_uint128s(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    if !writeable_section(asm, stmt_place) {
        return;
    }
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    if *pos == bytes.len() {
        return;
    }
    loop {
        skip_spaces(bytes, pos);
        if *pos < bytes.len() && bytes[*pos] != b',' {
            match parse_uint128(asm, pos) {
                Some(value) => {
                    let mut buf = [0u8; 16];
                    le::write_u64(&mut buf, 0, value as u64);
                    le::write_u64(&mut buf, 8, (value >> 64) as u64);
                    asm.put_data(&buf);
                }
                None => return,
            }
        }
        match skip_comma(asm, pos) {
            Some(true) => continue,
            Some(false) => break,
            None => return,
        }
    }
}

fn parse_uint128(asm: &mut Assembler, pos: &mut usize) -> Option<u128> {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    let start = *pos;
    let mut negative = false;
    if *pos < bytes.len() && (bytes[*pos] == b'-' || bytes[*pos] == b'+') {
        negative = bytes[*pos] == b'-';
        *pos += 1;
    }
    let (radix, digits_start) = if bytes[*pos..].starts_with(b"0x") || bytes[*pos..].starts_with(b"0X") {
        (16u32, *pos + 2)
    } else if bytes[*pos..].starts_with(b"0b") || bytes[*pos..].starts_with(b"0B") {
        (2, *pos + 2)
    } else if *pos < bytes.len() && bytes[*pos] == b'0' {
        (8, *pos)
    } else {
        (10, *pos)
    };
    let mut p = digits_start;
    let mut value: u128 = 0;
    let mut any = false;
    while p < bytes.len() {
        match (bytes[p] as char).to_digit(radix) {
            Some(d) => {
                value = value.wrapping_mul(u128::from(radix)).wrapping_add(u128::from(d));
                any = true;
                p += 1;
            }
            None => break,
        }
    }
    if !any {
        asm.print_error(start, "Missing number");
        return None;
    }
    *pos = p;
    Some(if negative { value.wrapping_neg() } else { value })
}

/// `.half`, `.float`, `.double`.
pub fn put_floats(asm: &mut Assembler, stmt_place: usize, pos: &mut usize, size: u8) {
    if !writeable_section(asm, stmt_place) {
        return;
    }
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    if *pos == bytes.len() {
        return;
    }
    loop {
        skip_spaces(bytes, pos);
        if *pos < bytes.len() && bytes[*pos] != b',' {
            let start = *pos;
            let mut end = *pos;
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric()
                    || matches!(bytes[end], b'.' | b'+' | b'-' | b'e' | b'E' | b'x' | b'p' | b'P'))
            {
                end += 1;
            }
            let text = std::str::from_utf8(&bytes[start..end]).unwrap_or("");
            match text.parse::<f64>() {
                Ok(v) => {
                    *pos = end;
                    match size {
                        2 => {
                            let mut buf = [0u8; 2];
                            le::write_u16(&mut buf, 0, f64_to_half_bits(v));
                            asm.put_data(&buf);
                        }
                        4 => {
                            let mut buf = [0u8; 4];
                            le::write_u32(&mut buf, 0, (v as f32).to_bits());
                            asm.put_data(&buf);
                        }
                        _ => {
                            let mut buf = [0u8; 8];
                            le::write_u64(&mut buf, 0, v.to_bits());
                            asm.put_data(&buf);
                        }
                    }
                }
                Err(_) => {
                    asm.print_error(start, "Floating point doesn't have value part!");
                    return;
                }
            }
        }
        match skip_comma(asm, pos) {
            Some(true) => continue,
            Some(false) => break,
            None => return,
        }
    }
}

/// IEEE binary16 conversion with round-to-nearest-even.
fn f64_to_half_bits(v: f64) -> u16 {
    let bits = (v as f32).to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32 - 127 + 15;
    let mant = bits & 0x7f_ffff;
    if exp >= 0x1f {
        // overflow or inf/nan
        let mant16 = if ((bits >> 23) & 0xff) == 0xff && mant != 0 { 0x200 } else { 0 };
        return sign | 0x7c00 | mant16;
    }
    if exp <= 0 {
        if exp < -10 {
            return sign;
        }
        let mant = mant | 0x80_0000;
        let shift = 14 - exp;
        let half = (mant >> shift) as u16;
        let round = (mant >> (shift - 1)) & 1;
        return sign | (half + round as u16);
    }
    let half = sign | ((exp as u16) << 10) | ((mant >> 13) as u16);
    let round = (mant >> 12) & 1;
    half + round as u16
}

/// `.ascii` / `.asciz` / `.string`.
pub fn put_strings(asm: &mut Assembler, stmt_place: usize, pos: &mut usize, add_zero: bool) {
    if !writeable_section(asm, stmt_place) {
        return;
    }
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    if *pos == bytes.len() {
        return;
    }
    loop {
        skip_spaces(bytes, pos);
        if *pos < bytes.len() && bytes[*pos] != b',' {
            match asm.parse_string(pos) {
                Some(s) => {
                    asm.put_data(s.as_bytes());
                    if add_zero {
                        asm.put_data(&[0]);
                    }
                }
                None => return,
            }
        }
        match skip_comma(asm, pos) {
            Some(true) => continue,
            Some(false) => break,
            None => return,
        }
    }
}

/// `.string16/32/64`: characters zero-extended to wider integers.
pub fn put_strings_to_ints(asm: &mut Assembler, stmt_place: usize, pos: &mut usize, size: u8) {
    if !writeable_section(asm, stmt_place) {
        return;
    }
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    if *pos == bytes.len() {
        return;
    }
    loop {
        skip_spaces(bytes, pos);
        if *pos < bytes.len() && bytes[*pos] != b',' {
            match asm.parse_string(pos) {
                Some(s) => {
                    let mut out = Vec::with_capacity((s.len() + 1) * size as usize);
                    for c in s.bytes().chain(std::iter::once(0)) {
                        let mut buf = [0u8; 8];
                        le::write_u64(&mut buf, 0, u64::from(c));
                        out.extend_from_slice(&buf[..size as usize]);
                    }
                    asm.put_data(&out);
                }
                None => return,
            }
        }
        match skip_comma(asm, pos) {
            Some(true) => continue,
            Some(false) => break,
            None => return,
        }
    }
}

/// `.fill` / `.fillq`.
pub fn do_fill(asm: &mut Assembler, stmt_place: usize, pos: &mut usize, is64: bool) {
    if !writeable_section(asm, stmt_place) {
        return;
    }
    let repeats = match get_absolute_value_arg(asm, pos, true) {
        Some(Some(v)) => v,
        _ => return,
    };
    let mut size = 1u64;
    let mut value = 0u64;
    if let Some(true) = skip_comma(asm, pos) {
        match get_absolute_value_arg(asm, pos, false) {
            Some(Some(v)) => size = v,
            Some(None) => {}
            None => return,
        }
        if let Some(true) = skip_comma(asm, pos) {
            match get_absolute_value_arg(asm, pos, false) {
                Some(Some(v)) => value = v,
                Some(None) => {}
                None => return,
            }
        }
    }
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    if size == 0 {
        return;
    }
    let value_size = if is64 { 8u64 } else { 4 };
    if !is64 && value >> 32 != 0 {
        asm.print_warning(stmt_place, "Value not fits in 32-bit value");
    }
    let pattern_size = size.min(value_size) as usize;
    let mut pattern = vec![0u8; size as usize];
    let mut buf = [0u8; 8];
    le::write_u64(&mut buf, 0, value);
    pattern[..pattern_size].copy_from_slice(&buf[..pattern_size]);
    for _ in 0..repeats {
        asm.put_data(&pattern);
    }
}

/// `.skip` / `.space`.
pub fn do_skip(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    if !writeable_section(asm, stmt_place) {
        return;
    }
    let size = match get_absolute_value_arg(asm, pos, true) {
        Some(Some(v)) => v,
        _ => return,
    };
    let mut fill = 0u8;
    if let Some(true) = skip_comma(asm, pos) {
        match get_absolute_value_arg(asm, pos, false) {
            Some(Some(v)) => fill = v as u8,
            Some(None) => {}
            None => return,
        }
    }
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    asm.put_data(&vec![fill; size as usize]);
}

/// `.align` / `.balign` / `.p2align`.
pub fn do_align(asm: &mut Assembler, stmt_place: usize, pos: &mut usize, power_of_2: bool) {
    if !writeable_section(asm, stmt_place) {
        return;
    }
    let arg = match get_absolute_value_arg(asm, pos, true) {
        Some(Some(v)) => v,
        _ => return,
    };
    let alignment = if power_of_2 {
        if arg >= 64 {
            asm.print_error(stmt_place, "Power of 2 of alignment is greater than 63");
            return;
        }
        1u64 << arg
    } else {
        if !arg.is_power_of_two() && arg != 0 {
            asm.print_error(stmt_place, "Alignment is not power of 2");
            return;
        }
        arg.max(1)
    };
    let mut fill = 0u8;
    let mut max_skip = u64::MAX;
    if let Some(true) = skip_comma(asm, pos) {
        match get_absolute_value_arg(asm, pos, false) {
            Some(Some(v)) => fill = v as u8,
            Some(None) => {}
            None => return,
        }
        if let Some(true) = skip_comma(asm, pos) {
            match get_absolute_value_arg(asm, pos, false) {
                Some(Some(v)) => max_skip = v,
                Some(None) => {}
                None => return,
            }
        }
    }
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    let out_pos = asm.current_out_pos as u64;
    let pad = (alignment - (out_pos % alignment)) % alignment;
    if pad > max_skip {
        return;
    }
    asm.put_data(&vec![fill; pad as usize]);
}
