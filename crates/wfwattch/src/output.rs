use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use wfwattch_frame::Reading;

const DISPLAY_TIME: &str = "%Y/%m/%d %H:%M:%S";
const JSON_TIME: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ReadingOutput {
    timestamp: String,
    power_w: f64,
    voltage_v: f64,
    current_a: f64,
    current_ma: f64,
}

impl From<&Reading> for ReadingOutput {
    fn from(reading: &Reading) -> Self {
        Self {
            timestamp: reading.timestamp.format(JSON_TIME).to_string(),
            power_w: reading.power,
            voltage_v: reading.voltage,
            current_a: reading.current,
            current_ma: reading.current_milliamps(),
        }
    }
}

/// Print the result of a one-shot measurement.
pub fn print_reading(reading: &Reading, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", json_line(reading)),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DATETIME", "POWER (W)", "VOLTAGE (V)", "CURRENT (mA)"])
                .add_row(vec![
                    reading.timestamp.format(DISPLAY_TIME).to_string(),
                    format!("{:.2}", reading.power),
                    format!("{:.2}", reading.voltage),
                    format!("{:.0}", reading.current_milliamps()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", pretty_block(reading)),
    }
}

/// Print one line per polled reading.
pub fn print_watch_reading(reading: &Reading, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", json_line(reading)),
        OutputFormat::Table | OutputFormat::Pretty => println!("{}", watch_line(reading)),
    }
}

fn json_line(reading: &Reading) -> String {
    serde_json::to_string(&ReadingOutput::from(reading)).unwrap_or_else(|_| "{}".to_string())
}

fn pretty_block(reading: &Reading) -> String {
    format!(
        "DateTime : {}\nPower    : {:.2}\nVoltage  : {:.2}\nCurrent  : {:.0}",
        reading.timestamp.format(DISPLAY_TIME),
        reading.power,
        reading.voltage,
        reading.current_milliamps()
    )
}

fn watch_line(reading: &Reading) -> String {
    format!(
        "{}: Power={:.3}W, Voltage={:.3}V, Current={:.3}mA",
        reading.timestamp.format(DISPLAY_TIME),
        reading.power,
        reading.voltage,
        reading.current_milliamps()
    )
}
