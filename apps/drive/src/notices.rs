use model::CameraId;
use std::fmt;

pub type NoticeTx = crossbeam_channel::Sender<DriverNotice>;
pub type NoticeRx = crossbeam_channel::Receiver<DriverNotice>;

/// What the driver gets to see. `Status` and `Toast` carry free text, the rest
/// map to dedicated display slots.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverNotice {
    Status(String),
    Toast(String),
    Speed { kmh: f64 },
    AverageSpeed { kmh: Option<f64> },
    CameraAhead { name: String, distance_m: f64, direction: &'static str, limit_kmh: u32 },
    Camera { name: String },
    OverLimit { speed_kmh: f64, limit_kmh: u32 },
    Saved { first: CameraId, second: CameraId, kmh: f64 },
}

impl fmt::Display for DriverNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverNotice::Status(s) => write!(f, "[status] {s}"),
            DriverNotice::Toast(s) => write!(f, "[!] {s}"),
            DriverNotice::Speed { kmh } => write!(f, "[speed] {} km/h", kmh.round()),
            DriverNotice::AverageSpeed { kmh: Some(kmh) } => write!(f, "[avg] {} km/h", kmh.round()),
            DriverNotice::AverageSpeed { kmh: None } => write!(f, "[avg] -"),
            DriverNotice::CameraAhead { name, distance_m, direction, limit_kmh } => {
                write!(f, "[camera] {name} in {:.0} m {direction}", distance_m)?;
                if *limit_kmh > 0 {
                    write!(f, ", limit {limit_kmh} km/h")?;
                }
                Ok(())
            }
            DriverNotice::Camera { name } => write!(f, "[camera] Camera: {name}"),
            DriverNotice::OverLimit { speed_kmh, limit_kmh } => {
                write!(f, "[!] {} km/h over the {limit_kmh} km/h limit", (speed_kmh - *limit_kmh as f64).round())
            }
            DriverNotice::Saved { first, second, kmh } => {
                write!(f, "[saved] segment {first} -> {second}: {kmh:.1} km/h")
            }
        }
    }
}

pub fn channel() -> (NoticeTx, NoticeRx) {
    crossbeam_channel::unbounded()
}

/// Prints notices as they arrive. Speed updates are chatty, so they are only
/// shown when the rounded value changes.
pub fn spawn_console(rx: NoticeRx) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut last_speed: Option<i64> = None;
        for notice in rx.iter() {
            if let DriverNotice::Speed { kmh } = &notice {
                let rounded = kmh.round() as i64;
                if last_speed == Some(rounded) {
                    continue;
                }
                last_speed = Some(rounded);
            }
            println!("{notice}");
        }
    })
}
