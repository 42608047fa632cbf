//! Per-family telemetry record layouts.
//!
//! The capability query reports the record geometry; this module turns
//! that geometry, the model string, and a handful of live capability
//! probes into a complete [`FieldMap`].
//!
//! Family selection follows the controllers' documented record shapes:
//!
//! | Geometry signature        | Family                          |
//! |---------------------------|---------------------------------|
//! | 18 general-status bytes   | DMC-30000 single-axis pocket    |
//! | 36-byte axis blocks       | DMC-4000 / DMC-41x3 / DMC-50000 |
//! | 28-byte axis blocks       | DMC-2100 / DMC-14x5 / Optima    |
//! | 0-byte axis blocks        | RIO I/O modules                 |
//!
//! Within the RIO family the I/O block size further selects the 47300
//! variant (24 digital channels), the extended-I/O daughterboard, and
//! the serial-encoder expansion.

use std::collections::HashMap;

use dmclib_core::error::{Error, Result};
use dmclib_core::types::RecordGeometry;
use tracing::debug;

use crate::field::{FieldDescriptor, FieldKind, FieldMap};
use crate::probe::CapabilityProbe;

use FieldKind::{SignedLong, SignedWord, UnsignedByte, UnsignedLong, UnsignedWord};

/// The standard divisor for filtered velocity (`_TV`) fields.
const VELOCITY_SCALE: f64 = 64.0;

/// The standard divisor for torque DAC (`_TT`) fields.
const TORQUE_SCALE: f64 = 3255.0;

/// Divisor for fixed-range 0-5 V analog channels upsampled to 16 bits.
const FIXED_ANALOG_SCALE: f64 = 13107.2;

/// Divisor for the +/-10 V analog outputs on the single-axis family.
const BIPOLAR_ANALOG_SCALE: f64 = 3276.8;

/// Build the field map for a controller from its record geometry and
/// model string, probing the live controller where the layout depends
/// on configuration.
///
/// Unknown geometries return
/// [`Error::Unsupported`](dmclib_core::Error::Unsupported) rather than
/// guessing a layout.
pub async fn build_field_map<P: CapabilityProbe + ?Sized>(
    geometry: RecordGeometry,
    model: &str,
    probe: &P,
) -> Result<FieldMap> {
    let mut fields = HashMap::new();

    // The single-axis family is recognized by its 18 general-status
    // bytes; the DMC-31010 variant carries a 16-bit ADC.
    if geometry.general_bytes == 18 {
        init_dmc30000(&mut fields, probe, model.contains("DMC31")).await?;
    } else if geometry.axis_bytes == 36 {
        init_dmc4000(&mut fields, probe, geometry.axes).await?;
    } else if geometry.axis_bytes == 28 {
        init_dmc2100(&mut fields, probe, geometry.axes).await?;
    } else if geometry.axis_bytes == 0 {
        // I/O-only module; the coordinate block carries the I/O block.
        let io_block = geometry.coord_bytes;
        let rio3 = matches!(io_block, 52 | 60 | 68);
        let rio_ser = matches!(io_block, 64 | 68);
        let rio3_ex = io_block == 60;
        init_rio(&mut fields, probe, rio3).await?;
        if rio3_ex {
            init_rio3_24ex(&mut fields);
        }
        if rio_ser {
            init_rio_ser(&mut fields, rio3);
        }
    } else {
        return Err(Error::Unsupported(format!(
            "unrecognized record geometry for model {}: {:?}",
            model, geometry
        )));
    }

    debug!(
        model = %model,
        fields = fields.len(),
        record_size = geometry.record_size(),
        "Built telemetry field map"
    );

    Ok(FieldMap::new(fields, geometry.record_size()))
}

type Fields = HashMap<String, FieldDescriptor>;

/// Compose an axis field name: prefix, axis letter, suffix.
fn ax(prefix: &str, axis: usize, suffix: &str) -> String {
    format!("{}{}{}", prefix, (b'A' + axis as u8) as char, suffix)
}

/// Map eight digital input bits starting at `num`, all within one byte.
fn input_bits(fields: &mut Fields, byte: usize, num: usize) {
    for i in 0..8 {
        fields.insert(
            format!("@IN[{:02}]", num + i),
            FieldDescriptor::bit(UnsignedByte, byte, i as u8),
        );
    }
}

/// Map eight digital output bits starting at `num`, all within one byte.
fn output_bits(fields: &mut Fields, byte: usize, num: usize) {
    for i in 0..8 {
        fields.insert(
            format!("@OUT[{:02}]", num + i),
            FieldDescriptor::bit(UnsignedByte, byte, i as u8),
        );
    }
}

/// Map a configurable analog input whose range and signedness depend on
/// the channel's AQ setting.
///
/// A refused query means the channel does not exist; the field is
/// simply not mapped.
async fn aq_analog<P: CapabilityProbe + ?Sized>(
    fields: &mut Fields,
    probe: &P,
    byte: usize,
    input_num: usize,
) -> Result<()> {
    let reply = match probe.query(&format!("MG{{Z10.0}}_AQ{}", input_num)).await {
        Ok(reply) => reply,
        Err(Error::CommandRejected) => return Ok(()),
        Err(e) => return Err(e),
    };
    let setting: i32 = reply.trim().parse().unwrap_or(2);
    let (kind, scale) = match setting.abs() {
        1 => (SignedWord, 32768.0 / 5.0),   //  -5 to 5 V
        3 => (UnsignedWord, 65536.0 / 5.0), //   0 to 5 V
        4 => (UnsignedWord, 65536.0 / 10.0), //  0 to 10 V
        _ => (SignedWord, 32768.0 / 10.0),  // -10 to 10 V, the default
    };
    fields.insert(
        format!("@AN[{}]", input_num),
        FieldDescriptor::scaled(kind, byte, scale),
    );
    Ok(())
}

/// Map a configurable analog output whose range depends on the
/// channel's DQ setting.
async fn dq_analog<P: CapabilityProbe + ?Sized>(
    fields: &mut Fields,
    probe: &P,
    byte: usize,
    output_num: usize,
) -> Result<()> {
    let reply = match probe.query(&format!("MG{{Z10.0}}_DQ{}", output_num)).await {
        Ok(reply) => reply,
        Err(Error::CommandRejected) => return Ok(()),
        Err(e) => return Err(e),
    };
    let setting: i32 = reply.trim().parse().unwrap_or(4);
    let (scale, offset) = match setting {
        3 => (32768.0 / 5.0, -5.0),  //  -5 to 5 V
        1 => (65536.0 / 5.0, 0.0),   //   0 to 5 V
        2 => (65536.0 / 10.0, 0.0),  //   0 to 10 V
        _ => (32768.0 / 10.0, -10.0), // -10 to 10 V, the default
    };
    fields.insert(
        format!("@AO[{}]", output_num),
        FieldDescriptor::scaled_offset(UnsignedWord, byte, scale, offset),
    );
    Ok(())
}

/// Which motion family an axis status block belongs to.
///
/// The single-axis and 4000-series blocks are identical; the 2100
/// series renames two status bits and stores torque as a word.
#[derive(Clone, Copy, PartialEq, Eq)]
enum MotionFamily {
    Dmc4000,
    Dmc2100,
}

/// Map one axis status block starting at `base`; returns the offset
/// just past the torque field.
fn motion_axis_block(fields: &mut Fields, base: usize, i: usize, family: MotionFamily) -> usize {
    let mut b = base;

    fields.insert(ax("_MO", i, ""), FieldDescriptor::bit(UnsignedWord, b, 0));
    match family {
        MotionFamily::Dmc4000 => {
            fields.insert(ax("HM", i, "3"), FieldDescriptor::bit(UnsignedWord, b, 1));
        }
        MotionFamily::Dmc2100 => {
            fields.insert(ax("_OE", i, ""), FieldDescriptor::bit(UnsignedWord, b, 1));
        }
    }
    fields.insert(ax("_AL", i, ""), FieldDescriptor::bit(UnsignedWord, b, 2));
    fields.insert(ax("DC", i, ""), FieldDescriptor::bit(UnsignedWord, b, 3));
    fields.insert(ax("ST", i, ""), FieldDescriptor::bit(UnsignedWord, b, 4));
    fields.insert(ax("SP", i, ""), FieldDescriptor::bit(UnsignedWord, b, 5));
    fields.insert(ax("CM", i, ""), FieldDescriptor::bit(UnsignedWord, b, 6));
    fields.insert(ax("JG", i, "-"), FieldDescriptor::bit(UnsignedWord, b, 7));
    b += 1;

    fields.insert(ax("VM", i, ""), FieldDescriptor::bit(UnsignedWord, b, 0));
    fields.insert(ax("HM", i, "2"), FieldDescriptor::bit(UnsignedWord, b, 1));
    fields.insert(ax("HM", i, "1"), FieldDescriptor::bit(UnsignedWord, b, 2));
    fields.insert(ax("HM", i, ""), FieldDescriptor::bit(UnsignedWord, b, 3));
    fields.insert(ax("FE", i, ""), FieldDescriptor::bit(UnsignedWord, b, 4));
    fields.insert(ax("PA", i, ""), FieldDescriptor::bit(UnsignedWord, b, 5));
    fields.insert(ax("PR", i, ""), FieldDescriptor::bit(UnsignedWord, b, 6));
    fields.insert(ax("_BG", i, ""), FieldDescriptor::bit(UnsignedWord, b, 7));
    b += 1;

    match family {
        MotionFamily::Dmc4000 => {
            fields.insert(ax("MT", i, ""), FieldDescriptor::bit(UnsignedWord, b, 0));
        }
        MotionFamily::Dmc2100 => {
            fields.insert(ax("SM", i, ""), FieldDescriptor::bit(UnsignedWord, b, 0));
        }
    }
    fields.insert(ax("_HM", i, ""), FieldDescriptor::bit(UnsignedWord, b, 1));
    fields.insert(ax("_LR", i, ""), FieldDescriptor::bit(UnsignedWord, b, 2));
    fields.insert(ax("_LF", i, ""), FieldDescriptor::bit(UnsignedWord, b, 3));
    // bits 4 and 5 reserved
    fields.insert(ax("AL", i, ""), FieldDescriptor::bit(UnsignedWord, b, 6));
    fields.insert(ax("_AL", i, "=0"), FieldDescriptor::bit(UnsignedWord, b, 6));
    b += 1;

    fields.insert(ax("_SC", i, ""), FieldDescriptor::value(UnsignedByte, b));
    b += 1;

    fields.insert(ax("_RP", i, ""), FieldDescriptor::value(SignedLong, b));
    b += 4;
    fields.insert(ax("_TP", i, ""), FieldDescriptor::value(SignedLong, b));
    b += 4;
    fields.insert(ax("_TE", i, ""), FieldDescriptor::value(SignedLong, b));
    b += 4;
    fields.insert(ax("_TD", i, ""), FieldDescriptor::value(SignedLong, b));
    b += 4;
    fields.insert(
        ax("_TV", i, ""),
        FieldDescriptor::scaled(SignedLong, b, VELOCITY_SCALE),
    );
    b += 4;

    match family {
        MotionFamily::Dmc4000 => {
            fields.insert(
                ax("_TT", i, ""),
                FieldDescriptor::scaled(SignedLong, b, TORQUE_SCALE),
            );
            b += 4;
        }
        MotionFamily::Dmc2100 => {
            fields.insert(
                ax("_TT", i, ""),
                FieldDescriptor::scaled(SignedWord, b, TORQUE_SCALE),
            );
            b += 2;
        }
    }

    b
}

/// Probe extended I/O bank direction and map banks 2-6 accordingly.
///
/// Each direction bit selects whether a bank's record byte carries
/// outputs or inputs. `banks` limits how many banks the family has.
async fn extended_io_banks<P: CapabilityProbe + ?Sized>(
    fields: &mut Fields,
    probe: &P,
    banks: usize,
) -> Result<bool> {
    let co: i32 = match probe.query("MG_CO").await {
        Ok(reply) => reply.trim().parse().map_err(|_| {
            Error::Protocol(format!("unparseable extended I/O config: {:?}", reply))
        })?,
        // Models without extended I/O refuse the query
        Err(Error::CommandRejected) => return Ok(false),
        Err(e) => return Err(e),
    };

    // (direction bit, output record byte, input record byte, first point)
    const BANKS: [(i32, usize, usize, usize); 5] = [
        (0x01, 18, 8, 17),
        (0x02, 19, 9, 25),
        (0x04, 20, 10, 33),
        (0x08, 21, 11, 41),
        (0x10, 22, 12, 49),
    ];
    for &(bit, out_byte, in_byte, num) in BANKS.iter().take(banks) {
        if co & bit != 0 {
            output_bits(fields, out_byte, num);
        } else {
            input_bits(fields, in_byte, num);
        }
    }
    Ok(true)
}

/// The single-axis pocket family (record bytes 0-3 are the header).
async fn init_dmc30000<P: CapabilityProbe + ?Sized>(
    fields: &mut Fields,
    probe: &P,
    sixteen_bit_adc: bool,
) -> Result<()> {
    fields.insert("TIME".into(), FieldDescriptor::value(UnsignedWord, 4));

    for i in 0..8 {
        fields.insert(
            format!("@IN[{}]", i + 1),
            FieldDescriptor::bit(UnsignedByte, 6, i),
        );
    }
    for i in 0..4 {
        fields.insert(
            format!("@OUT[{}]", i + 1),
            FieldDescriptor::bit(UnsignedByte, 8, i),
        );
    }

    fields.insert("_TC".into(), FieldDescriptor::value(UnsignedByte, 10));

    for i in 0..6 {
        fields.insert(format!("NO{}", i), FieldDescriptor::bit(UnsignedByte, 11, i));
    }

    // The 16-bit ADC variant reports analog via configurable AQ ranges
    if sixteen_bit_adc {
        aq_analog(fields, probe, 12, 2).await?;
    } else {
        fields.insert(
            "@AN[2]".into(),
            FieldDescriptor::scaled(UnsignedWord, 12, FIXED_ANALOG_SCALE),
        );
    }

    fields.insert(
        "@AO[1]".into(),
        FieldDescriptor::scaled(SignedWord, 14, BIPOLAR_ANALOG_SCALE),
    );
    fields.insert(
        "@AO[2]".into(),
        FieldDescriptor::scaled(SignedWord, 16, BIPOLAR_ANALOG_SCALE),
    );

    // Amplifier status
    fields.insert("TA00".into(), FieldDescriptor::bit(UnsignedByte, 18, 0));
    fields.insert("TA01".into(), FieldDescriptor::bit(UnsignedByte, 18, 1));
    fields.insert("TA02".into(), FieldDescriptor::bit(UnsignedByte, 18, 2));
    fields.insert("TA03".into(), FieldDescriptor::bit(UnsignedByte, 18, 3));
    fields.insert("TA1A".into(), FieldDescriptor::bit(UnsignedByte, 19, 0));
    fields.insert("TA2A".into(), FieldDescriptor::bit(UnsignedByte, 20, 0));
    fields.insert("TA3AD".into(), FieldDescriptor::bit(UnsignedByte, 21, 0));

    // Contour mode
    fields.insert("CD".into(), FieldDescriptor::value(UnsignedLong, 22));
    fields.insert("_CM".into(), FieldDescriptor::value(UnsignedWord, 26));

    // Coordinated motion, S plane
    fields.insert("_CSS".into(), FieldDescriptor::value(UnsignedWord, 28));
    fields.insert("VDS".into(), FieldDescriptor::bit(UnsignedByte, 30, 3));
    fields.insert("STS".into(), FieldDescriptor::bit(UnsignedByte, 30, 4));
    fields.insert("VSS".into(), FieldDescriptor::bit(UnsignedByte, 30, 5));
    fields.insert("_BGS".into(), FieldDescriptor::bit(UnsignedByte, 31, 7));
    fields.insert("_AVS".into(), FieldDescriptor::value(SignedLong, 32));
    fields.insert("_LMS".into(), FieldDescriptor::value(UnsignedWord, 36));

    // Single axis block
    let mut base = motion_axis_block(fields, 38, 0, MotionFamily::Dmc4000);

    if sixteen_bit_adc {
        aq_analog(fields, probe, base, 1).await?;
    } else {
        fields.insert(
            "@AN[1]".into(),
            FieldDescriptor::scaled(UnsignedWord, base, FIXED_ANALOG_SCALE),
        );
    }
    base += 2;

    fields.insert(ax("_QH", 0, ""), FieldDescriptor::value(UnsignedByte, base));
    base += 2; // one reserved byte after the hall state
    fields.insert(ax("_ZA", 0, ""), FieldDescriptor::value(SignedLong, base));

    Ok(())
}

/// The 4000 series and its 41x3 / 50000 relatives.
async fn init_dmc4000<P: CapabilityProbe + ?Sized>(
    fields: &mut Fields,
    probe: &P,
    axes: usize,
) -> Result<()> {
    fields.insert("TIME".into(), FieldDescriptor::value(UnsignedWord, 4));

    // Digital inputs; points 9-16 exist only with axes 5-8 fitted
    fields.insert("_TI0".into(), FieldDescriptor::value(UnsignedByte, 6));
    input_bits(fields, 6, 1);
    fields.insert("_TI1".into(), FieldDescriptor::value(UnsignedByte, 7));
    if axes > 4 {
        input_bits(fields, 7, 9);
    }

    // Digital outputs
    fields.insert("_OP0".into(), FieldDescriptor::value(UnsignedWord, 16));
    output_bits(fields, 16, 1);
    if axes > 4 {
        output_bits(fields, 17, 9);
    }

    if extended_io_banks(fields, probe, 4).await? {
        fields.insert("_TI2".into(), FieldDescriptor::value(UnsignedByte, 8));
        fields.insert("_TI3".into(), FieldDescriptor::value(UnsignedByte, 9));
        fields.insert("_TI4".into(), FieldDescriptor::value(UnsignedByte, 10));
        fields.insert("_TI5".into(), FieldDescriptor::value(UnsignedByte, 11));
        fields.insert("_OP1".into(), FieldDescriptor::value(UnsignedWord, 18));
        fields.insert("_OP2".into(), FieldDescriptor::value(UnsignedWord, 20));
    }

    // Ethernet handle status
    for i in 0..8usize {
        fields.insert(
            format!("_IH{}2", (b'A' + i as u8) as char),
            FieldDescriptor::value(UnsignedByte, 42 + i),
        );
    }

    fields.insert("_TC".into(), FieldDescriptor::value(UnsignedByte, 50));

    for i in 0..8 {
        fields.insert(format!("NO{}", i), FieldDescriptor::bit(UnsignedByte, 51, i));
    }

    // Amplifier status
    for i in 0..8 {
        fields.insert(format!("TA0{}", i), FieldDescriptor::bit(UnsignedByte, 52, i));
    }
    for i in 0..8usize {
        fields.insert(
            format!("TA1{}", (b'A' + i as u8) as char),
            FieldDescriptor::bit(UnsignedByte, 53, i as u8),
        );
        fields.insert(
            format!("TA2{}", (b'A' + i as u8) as char),
            FieldDescriptor::bit(UnsignedByte, 54, i as u8),
        );
    }
    fields.insert("TA3AD".into(), FieldDescriptor::bit(UnsignedByte, 55, 0));
    fields.insert("TA3EH".into(), FieldDescriptor::bit(UnsignedByte, 55, 1));

    // Contour mode
    fields.insert("CD".into(), FieldDescriptor::value(UnsignedLong, 56));
    fields.insert("_CM".into(), FieldDescriptor::value(UnsignedWord, 60));

    // Coordinated motion, S and T planes
    fields.insert("_CSS".into(), FieldDescriptor::value(UnsignedWord, 62));
    fields.insert("VDS".into(), FieldDescriptor::bit(UnsignedByte, 64, 3));
    fields.insert("STS".into(), FieldDescriptor::bit(UnsignedByte, 64, 4));
    fields.insert("VSS".into(), FieldDescriptor::bit(UnsignedByte, 64, 5));
    fields.insert("_BGS".into(), FieldDescriptor::bit(UnsignedByte, 65, 7));
    fields.insert("_AVS".into(), FieldDescriptor::value(SignedLong, 66));
    fields.insert("_LMS".into(), FieldDescriptor::value(UnsignedWord, 70));

    fields.insert("_CST".into(), FieldDescriptor::value(UnsignedWord, 72));
    fields.insert("VDT".into(), FieldDescriptor::bit(UnsignedByte, 74, 3));
    fields.insert("STT".into(), FieldDescriptor::bit(UnsignedByte, 74, 4));
    fields.insert("VST".into(), FieldDescriptor::bit(UnsignedByte, 74, 5));
    fields.insert("_BGT".into(), FieldDescriptor::bit(UnsignedByte, 75, 7));
    fields.insert("_AVT".into(), FieldDescriptor::value(SignedLong, 76));
    fields.insert("_LMT".into(), FieldDescriptor::value(UnsignedWord, 80));

    // Per-axis blocks, 36 bytes each
    let mut base = 82;
    for i in 0..axes {
        base = motion_axis_block(fields, base, i, MotionFamily::Dmc4000);

        aq_analog(fields, probe, base, i + 1).await?;
        base += 2;

        fields.insert(ax("_QH", i, ""), FieldDescriptor::value(UnsignedByte, base));
        base += 2; // one reserved byte after the hall state
        fields.insert(ax("_ZA", i, ""), FieldDescriptor::value(SignedLong, base));
        base += 4;
    }

    Ok(())
}

/// The 2100 series and its 14x5 / Optima relatives.
async fn init_dmc2100<P: CapabilityProbe + ?Sized>(
    fields: &mut Fields,
    probe: &P,
    axes: usize,
) -> Result<()> {
    // The analog daughterboard answers @AN queries; without it the
    // per-axis analog bytes are meaningless.
    let db28040 = !matches!(
        probe.query("MG @AN[1]").await,
        Err(Error::CommandRejected)
    );

    fields.insert("TIME".into(), FieldDescriptor::value(UnsignedWord, 4));

    fields.insert("_TI0".into(), FieldDescriptor::value(UnsignedByte, 6));
    input_bits(fields, 6, 1);
    fields.insert("_TI1".into(), FieldDescriptor::value(UnsignedByte, 7));
    if axes > 4 {
        input_bits(fields, 7, 9);
    }

    fields.insert("_OP0".into(), FieldDescriptor::value(UnsignedWord, 16));
    output_bits(fields, 16, 1);
    if axes > 4 {
        output_bits(fields, 17, 9);
    }

    if db28040 && extended_io_banks(fields, probe, 5).await? {
        fields.insert("_TI2".into(), FieldDescriptor::value(UnsignedByte, 8));
        fields.insert("_TI3".into(), FieldDescriptor::value(UnsignedByte, 9));
        fields.insert("_TI4".into(), FieldDescriptor::value(UnsignedByte, 10));
        fields.insert("_TI5".into(), FieldDescriptor::value(UnsignedByte, 11));
        fields.insert("_TI6".into(), FieldDescriptor::value(UnsignedByte, 12));
        fields.insert("_OP1".into(), FieldDescriptor::value(UnsignedWord, 18));
        fields.insert("_OP2".into(), FieldDescriptor::value(UnsignedWord, 20));
        fields.insert("_OP3".into(), FieldDescriptor::value(UnsignedWord, 22));
    }

    fields.insert("_TC".into(), FieldDescriptor::value(UnsignedByte, 26));

    // Interpreter status
    fields.insert("_EO".into(), FieldDescriptor::bit(UnsignedByte, 27, 0));
    fields.insert("TR".into(), FieldDescriptor::bit(UnsignedByte, 27, 1));
    fields.insert("IN".into(), FieldDescriptor::bit(UnsignedByte, 27, 2));
    fields.insert("XQ".into(), FieldDescriptor::bit(UnsignedByte, 27, 7));

    // Coordinated motion, S and T planes (no buffer-space fields here)
    fields.insert("_CSS".into(), FieldDescriptor::value(UnsignedWord, 28));
    fields.insert("VDS".into(), FieldDescriptor::bit(UnsignedByte, 30, 3));
    fields.insert("STS".into(), FieldDescriptor::bit(UnsignedByte, 30, 4));
    fields.insert("VSS".into(), FieldDescriptor::bit(UnsignedByte, 30, 5));
    fields.insert("_BGS".into(), FieldDescriptor::bit(UnsignedByte, 31, 7));
    fields.insert("_AVS".into(), FieldDescriptor::value(SignedLong, 32));

    fields.insert("_CST".into(), FieldDescriptor::value(UnsignedWord, 36));
    fields.insert("VDT".into(), FieldDescriptor::bit(UnsignedByte, 38, 3));
    fields.insert("STT".into(), FieldDescriptor::bit(UnsignedByte, 38, 4));
    fields.insert("VST".into(), FieldDescriptor::bit(UnsignedByte, 38, 5));
    fields.insert("_BGT".into(), FieldDescriptor::bit(UnsignedByte, 39, 7));
    fields.insert("_AVT".into(), FieldDescriptor::value(SignedLong, 40));

    // Per-axis blocks, 28 bytes each
    let mut base = 44;
    for i in 0..axes {
        base = motion_axis_block(fields, base, i, MotionFamily::Dmc2100);

        if db28040 {
            aq_analog(fields, probe, base, i + 1).await?;
        }
        base += 2;
    }

    Ok(())
}

/// The RIO I/O-only family. `rio3` selects the 47300 variant with 24
/// digital channels per direction.
async fn init_rio<P: CapabilityProbe + ?Sized>(
    fields: &mut Fields,
    probe: &P,
    rio3: bool,
) -> Result<()> {
    fields.insert("TIME".into(), FieldDescriptor::value(UnsignedWord, 4));
    fields.insert("_TC".into(), FieldDescriptor::value(UnsignedByte, 6));

    fields.insert("_EO".into(), FieldDescriptor::bit(UnsignedByte, 7, 0));
    fields.insert("TR".into(), FieldDescriptor::bit(UnsignedByte, 7, 1));
    fields.insert("IN".into(), FieldDescriptor::bit(UnsignedByte, 7, 2));
    fields.insert("XQ".into(), FieldDescriptor::bit(UnsignedByte, 7, 7));

    // The ID reply advertises programmable analog hardware
    let (dq, aq) = match probe.query("ID").await {
        Ok(id) => (id.contains("(DQ)"), id.contains("(AQ)")),
        Err(Error::CommandRejected) => (false, false),
        Err(e) => return Err(e),
    };

    for ch in 0..8 {
        let byte = 8 + ch * 2;
        if dq {
            dq_analog(fields, probe, byte, ch).await?;
        } else {
            // fixed 0-5 V
            fields.insert(
                format!("@AO[{}]", ch),
                FieldDescriptor::scaled(UnsignedWord, byte, FIXED_ANALOG_SCALE),
            );
        }
    }

    for ch in 0..8 {
        let byte = 24 + ch * 2;
        if aq {
            aq_analog(fields, probe, byte, ch).await?;
        } else {
            // fixed 0-5 V
            fields.insert(
                format!("@AN[{}]", ch),
                FieldDescriptor::scaled(UnsignedWord, byte, FIXED_ANALOG_SCALE),
            );
        }
    }

    // Digital I/O; the 47300 has a third byte per direction plus one
    // reserved byte
    let mut base = 40;

    fields.insert("_OP0".into(), FieldDescriptor::value(UnsignedByte, base));
    output_bits(fields, base, 0);
    base += 1;
    fields.insert("_OP1".into(), FieldDescriptor::value(UnsignedByte, base));
    output_bits(fields, base, 8);
    base += 1;
    if rio3 {
        fields.insert("_OP2".into(), FieldDescriptor::value(UnsignedByte, base));
        output_bits(fields, base, 16);
        base += 2;
    }

    fields.insert("_TI0".into(), FieldDescriptor::value(UnsignedByte, base));
    input_bits(fields, base, 0);
    base += 1;
    fields.insert("_TI1".into(), FieldDescriptor::value(UnsignedByte, base));
    input_bits(fields, base, 8);
    base += 1;
    if rio3 {
        fields.insert("_TI2".into(), FieldDescriptor::value(UnsignedByte, base));
        input_bits(fields, base, 16);
        base += 2;
    }

    fields.insert("_PC".into(), FieldDescriptor::value(UnsignedLong, base));
    base += 4;

    fields.insert("_ZC".into(), FieldDescriptor::value(SignedLong, base));
    base += 4;
    fields.insert("_ZD".into(), FieldDescriptor::value(SignedLong, base));

    Ok(())
}

/// Extended I/O daughterboard on the 47300: three more bytes per
/// direction, one reserved byte after each group.
fn init_rio3_24ex(fields: &mut Fields) {
    fields.insert("_OP3".into(), FieldDescriptor::value(UnsignedByte, 60));
    output_bits(fields, 60, 24);
    fields.insert("_OP4".into(), FieldDescriptor::value(UnsignedByte, 61));
    output_bits(fields, 61, 32);
    fields.insert("_OP5".into(), FieldDescriptor::value(UnsignedByte, 62));
    output_bits(fields, 62, 40);

    fields.insert("_TI3".into(), FieldDescriptor::value(UnsignedByte, 64));
    input_bits(fields, 64, 24);
    fields.insert("_TI4".into(), FieldDescriptor::value(UnsignedByte, 65));
    input_bits(fields, 65, 32);
    fields.insert("_TI5".into(), FieldDescriptor::value(UnsignedByte, 66));
    input_bits(fields, 66, 40);
}

/// Serial-encoder expansion: four encoder longs appended to the record.
fn init_rio_ser(fields: &mut Fields, rio3: bool) {
    let mut base = if rio3 { 60 } else { 56 };
    for ch in 0..4 {
        fields.insert(
            format!("_QE{}", ch),
            FieldDescriptor::value(SignedLong, base),
        );
        base += 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::CannedProbe;

    fn geometry(s: &str) -> RecordGeometry {
        s.parse().unwrap()
    }

    // ---- family dispatch ----

    #[tokio::test]
    async fn eighteen_general_bytes_selects_single_axis_family() {
        let probe = CannedProbe::new();
        let map = build_field_map(geometry("4,18,0,0"), "DMC30010", &probe)
            .await
            .unwrap();
        // Single-axis layout: thread bits live at byte 11
        assert_eq!(
            map.descriptor("NO0"),
            Some(&FieldDescriptor::bit(UnsignedByte, 11, 0))
        );
        assert!(map.descriptor("_TPA").is_some());
        assert!(map.descriptor("_TPB").is_none());
    }

    #[tokio::test]
    async fn unknown_geometry_is_unsupported() {
        let probe = CannedProbe::new();
        let err = build_field_map(geometry("2,30,10,17"), "DMC9999", &probe)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    // ---- single-axis family ----

    #[tokio::test]
    async fn dmc30000_layout() {
        let probe = CannedProbe::new();
        let map = build_field_map(geometry("1,18,16,36"), "DMC30010", &probe)
            .await
            .unwrap();

        assert_eq!(
            map.descriptor("TIME"),
            Some(&FieldDescriptor::value(UnsignedWord, 4))
        );
        assert_eq!(
            map.descriptor("_TC"),
            Some(&FieldDescriptor::value(UnsignedByte, 10))
        );
        // Axis block starts at 38: _TP at +8, _TV at +20 with divisor 64
        assert_eq!(
            map.descriptor("_TPA"),
            Some(&FieldDescriptor::value(SignedLong, 46))
        );
        assert_eq!(
            map.descriptor("_TVA"),
            Some(&FieldDescriptor::scaled(SignedLong, 58, 64.0))
        );
        assert_eq!(
            map.descriptor("_BGA"),
            Some(&FieldDescriptor::bit(UnsignedWord, 39, 7))
        );
        // Fixed-range analog without the 16-bit ADC
        assert_eq!(
            map.descriptor("@AN[1]"),
            Some(&FieldDescriptor::scaled(UnsignedWord, 66, 13107.2))
        );
        assert_eq!(
            map.descriptor("_ZAA"),
            Some(&FieldDescriptor::value(SignedLong, 70))
        );
        assert_eq!(map.record_size(), 4 + 36 + 18 + 16);
    }

    #[tokio::test]
    async fn dmc31010_probes_analog_ranges() {
        // AQ 1 is -5..5 V signed
        let probe = CannedProbe::new()
            .reply("MG{Z10.0}_AQ1", " 1")
            .reply("MG{Z10.0}_AQ2", " 3");
        let map = build_field_map(geometry("1,18,16,36"), "DMC31010", &probe)
            .await
            .unwrap();

        assert_eq!(
            map.descriptor("@AN[2]"),
            Some(&FieldDescriptor::scaled(UnsignedWord, 12, 65536.0 / 5.0))
        );
        assert_eq!(
            map.descriptor("@AN[1]"),
            Some(&FieldDescriptor::scaled(SignedWord, 66, 32768.0 / 5.0))
        );
    }

    // ---- 4000 family ----

    #[tokio::test]
    async fn dmc4000_layout_with_extended_io() {
        // Banks 2 and 3 configured as outputs, 4 and 5 as inputs
        let probe = CannedProbe::new().reply("MG_CO", "3");
        let map = build_field_map(geometry("8,52,26,36"), "DMC4080", &probe)
            .await
            .unwrap();

        assert_eq!(
            map.descriptor("_TC"),
            Some(&FieldDescriptor::value(UnsignedByte, 50))
        );
        assert_eq!(
            map.descriptor("_IHA2"),
            Some(&FieldDescriptor::value(UnsignedByte, 42))
        );
        // Bank 2 output points start at @OUT[17] in record byte 18
        assert_eq!(
            map.descriptor("@OUT[17]"),
            Some(&FieldDescriptor::bit(UnsignedByte, 18, 0))
        );
        // Bank 4 fell back to inputs at record byte 10
        assert_eq!(
            map.descriptor("@IN[33]"),
            Some(&FieldDescriptor::bit(UnsignedByte, 10, 0))
        );
        // Eighth axis block: 82 + 7*36 = 334, _TP at +8
        assert_eq!(
            map.descriptor("_TPH"),
            Some(&FieldDescriptor::value(SignedLong, 342))
        );
        assert_eq!(
            map.descriptor("_TTH"),
            Some(&FieldDescriptor::scaled(SignedLong, 358, 3255.0))
        );
        assert_eq!(map.record_size(), 4 + 8 * 36 + 52 + 26);
    }

    #[tokio::test]
    async fn dmc4143_without_extended_io() {
        // The 41x3 refuses MG_CO; no extended banks appear
        let probe = CannedProbe::new();
        let map = build_field_map(geometry("4,52,26,36"), "DMC4143", &probe)
            .await
            .unwrap();

        assert!(map.descriptor("_TI2").is_none());
        assert!(map.descriptor("@OUT[17]").is_none());
        // Four axes: no second input bank either
        assert!(map.descriptor("@IN[09]").is_none());
        assert!(map.descriptor("_TPD").is_some());
        assert!(map.descriptor("_TPE").is_none());
    }

    // ---- 2100 family ----

    #[tokio::test]
    async fn dmc2100_layout() {
        let probe = CannedProbe::new()
            .reply("MG @AN[1]", " 2.5000")
            .reply("MG_CO", "0")
            .reply("MG{Z10.0}_AQ1", " 2")
            .reply("MG{Z10.0}_AQ2", " 2");
        let map = build_field_map(geometry("2,24,16,28"), "DMC2120", &probe)
            .await
            .unwrap();

        assert_eq!(
            map.descriptor("_TC"),
            Some(&FieldDescriptor::value(UnsignedByte, 26))
        );
        assert_eq!(
            map.descriptor("XQ"),
            Some(&FieldDescriptor::bit(UnsignedByte, 27, 7))
        );
        // 2100 renames the stepper and off-on-error bits
        assert_eq!(
            map.descriptor("SMA"),
            Some(&FieldDescriptor::bit(UnsignedWord, 46, 0))
        );
        assert_eq!(
            map.descriptor("_OEA"),
            Some(&FieldDescriptor::bit(UnsignedWord, 44, 1))
        );
        assert!(map.descriptor("MTA").is_none());
        // Torque is a word here, at axis base + 24
        assert_eq!(
            map.descriptor("_TTA"),
            Some(&FieldDescriptor::scaled(SignedWord, 68, 3255.0))
        );
        // Daughterboard analog at axis base + 26, default -10..10 V
        assert_eq!(
            map.descriptor("@AN[1]"),
            Some(&FieldDescriptor::scaled(SignedWord, 70, 32768.0 / 10.0))
        );
        // Second axis block at 72
        assert_eq!(
            map.descriptor("_TPB"),
            Some(&FieldDescriptor::value(SignedLong, 80))
        );
    }

    #[tokio::test]
    async fn dmc2100_without_daughterboard_has_no_axis_analog() {
        let probe = CannedProbe::new();
        let map = build_field_map(geometry("2,24,16,28"), "DMC2120", &probe)
            .await
            .unwrap();
        assert!(map.descriptor("@AN[1]").is_none());
        assert!(map.descriptor("_TPA").is_some());
    }

    // ---- RIO family ----

    #[tokio::test]
    async fn rio_47300_with_programmable_analog() {
        let probe = CannedProbe::new()
            .reply("ID", "RIO47300 (DQ) (AQ)")
            .reply("MG{Z10.0}_AQ0", " 3")
            .reply("MG{Z10.0}_AQ1", " 1")
            .reply("MG{Z10.0}_AQ2", " 2")
            .reply("MG{Z10.0}_AQ3", " 2")
            .reply("MG{Z10.0}_AQ4", " 2")
            .reply("MG{Z10.0}_AQ5", " 2")
            .reply("MG{Z10.0}_AQ6", " 2")
            .reply("MG{Z10.0}_AQ7", " 4")
            .reply("MG{Z10.0}_DQ0", " 3")
            .reply("MG{Z10.0}_DQ1", " 1")
            .reply("MG{Z10.0}_DQ2", " 2")
            .reply("MG{Z10.0}_DQ3", " 4")
            .reply("MG{Z10.0}_DQ4", " 4")
            .reply("MG{Z10.0}_DQ5", " 4")
            .reply("MG{Z10.0}_DQ6", " 4")
            .reply("MG{Z10.0}_DQ7", " 4");
        let map = build_field_map(geometry("0,8,52,0"), "RIO47300", &probe)
            .await
            .unwrap();

        // AQ 3: unsigned 0-5 V at input 0
        assert_eq!(
            map.descriptor("@AN[0]"),
            Some(&FieldDescriptor::scaled(UnsignedWord, 24, 65536.0 / 5.0))
        );
        // DQ 3: -5..5 V with -5 offset at output 0
        assert_eq!(
            map.descriptor("@AO[0]"),
            Some(&FieldDescriptor::scaled_offset(
                UnsignedWord,
                8,
                32768.0 / 5.0,
                -5.0
            ))
        );
        // 47300 digital layout: third output byte then a reserved byte
        assert_eq!(
            map.descriptor("@OUT[16]"),
            Some(&FieldDescriptor::bit(UnsignedByte, 42, 0))
        );
        assert_eq!(
            map.descriptor("@IN[00]"),
            Some(&FieldDescriptor::bit(UnsignedByte, 44, 0))
        );
        assert_eq!(
            map.descriptor("_PC"),
            Some(&FieldDescriptor::value(UnsignedLong, 48))
        );
        assert_eq!(
            map.descriptor("_ZD"),
            Some(&FieldDescriptor::value(SignedLong, 56))
        );
    }

    #[tokio::test]
    async fn rio_fixed_analog_without_id_match() {
        let probe = CannedProbe::new().reply("ID", "RIO47100");
        let map = build_field_map(geometry("0,8,44,0"), "RIO47100", &probe)
            .await
            .unwrap();

        assert_eq!(
            map.descriptor("@AN[5]"),
            Some(&FieldDescriptor::scaled(UnsignedWord, 34, 13107.2))
        );
        assert_eq!(
            map.descriptor("@AO[7]"),
            Some(&FieldDescriptor::scaled(UnsignedWord, 22, 13107.2))
        );
        // Two-byte digital layout: inputs right after outputs
        assert_eq!(
            map.descriptor("@IN[08]"),
            Some(&FieldDescriptor::bit(UnsignedByte, 43, 0))
        );
        assert_eq!(
            map.descriptor("_PC"),
            Some(&FieldDescriptor::value(UnsignedLong, 44))
        );
        assert!(map.descriptor("@OUT[16]").is_none());
    }

    #[tokio::test]
    async fn rio_extended_io_block() {
        let probe = CannedProbe::new().reply("ID", "RIO47300");
        // io block 60: 47300 plus extended I/O
        let map = build_field_map(geometry("0,8,60,0"), "RIO47300", &probe)
            .await
            .unwrap();

        assert_eq!(
            map.descriptor("@OUT[24]"),
            Some(&FieldDescriptor::bit(UnsignedByte, 60, 0))
        );
        assert_eq!(
            map.descriptor("@IN[47]"),
            Some(&FieldDescriptor::bit(UnsignedByte, 66, 7))
        );
        assert!(map.descriptor("_QE0").is_none());
    }

    #[tokio::test]
    async fn rio_serial_encoders() {
        let probe = CannedProbe::new().reply("ID", "RIO47200");
        // io block 64: two-byte digital layout plus four encoder longs
        let map = build_field_map(geometry("0,8,64,0"), "RIO47200", &probe)
            .await
            .unwrap();
        assert_eq!(
            map.descriptor("_QE0"),
            Some(&FieldDescriptor::value(SignedLong, 56))
        );

        // io block 68: 47300 digital layout shifts the encoders up
        let probe = CannedProbe::new().reply("ID", "RIO47300");
        let map = build_field_map(geometry("0,8,68,0"), "RIO47300", &probe)
            .await
            .unwrap();
        assert_eq!(
            map.descriptor("_QE3"),
            Some(&FieldDescriptor::value(SignedLong, 72))
        );
    }
}
