//! Servo calibration tables and their JSON file form: an array of five
//! `[opened, closed]` rows, row index = motor id.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::proto::{CalibrationData, CalibrationTable, Command, MotorId, command::MAX_ANGLE};

/// Commands that program and persist `table` on the device.
pub fn upload_commands(table: &CalibrationTable) -> Vec<Command> {
    let mut out: Vec<Command> = table.iter().copied().map(Command::Calibrate).collect();
    out.push(Command::SaveCalibration);
    out
}

pub fn table_to_rows(table: &CalibrationTable) -> Vec<[u8; 2]> {
    table
        .iter()
        .map(|c| [c.opened_angle, c.closed_angle])
        .collect()
}

pub fn rows_to_table(rows: &[[u16; 2]]) -> Result<CalibrationTable> {
    if rows.len() != MotorId::ALL.len() {
        bail!(
            "calibration needs {} rows, got {}",
            MotorId::ALL.len(),
            rows.len()
        );
    }
    let mut table = [CalibrationData {
        motor: MotorId::S0,
        opened_angle: 0,
        closed_angle: 0,
    }; 5];
    for ((slot, motor), [opened, closed]) in table.iter_mut().zip(MotorId::ALL).zip(rows) {
        if *opened > MAX_ANGLE as u16 || *closed > MAX_ANGLE as u16 {
            bail!(
                "motor {}: angles {}, {} outside 0..={}",
                motor.index(),
                opened,
                closed,
                MAX_ANGLE
            );
        }
        *slot = CalibrationData {
            motor,
            opened_angle: *opened as u8,
            closed_angle: *closed as u8,
        };
    }
    Ok(table)
}

pub fn read_calibration<R: Read>(reader: R) -> Result<CalibrationTable> {
    let rows: Vec<[u16; 2]> =
        serde_json::from_reader(reader).context("parse calibration JSON")?;
    rows_to_table(&rows)
}

pub fn write_calibration<W: Write>(writer: W, table: &CalibrationTable) -> Result<()> {
    serde_json::to_writer_pretty(writer, &table_to_rows(table)).context("write calibration JSON")
}

pub fn load_calibration(path: &Path) -> Result<CalibrationTable> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("open calibration {}", path.display()))?;
    read_calibration(std::io::BufReader::new(file))
        .with_context(|| format!("load calibration {}", path.display()))
}

pub fn save_calibration(path: &Path, table: &CalibrationTable) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("create calibration {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    write_calibration(&mut writer, table)?;
    writer
        .flush()
        .with_context(|| format!("flush calibration {}", path.display()))
}
