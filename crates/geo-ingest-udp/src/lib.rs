use byteorder::{LittleEndian, ReadBytesExt};
use geo_ingest_core::*;
use model::{Coordinate, PositionSample};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tokio::{net::UdpSocket, time::Instant};
use tracing::{debug, info};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub bind_addr: String, // e.g. "0.0.0.0:5599"
    pub watch: WatchOptions,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self { bind_addr: "0.0.0.0:5599".into(), watch: WatchOptions::default() }
    }
}

pub struct UdpPositionSource {
    cfg: UdpConfig,
}

impl UdpPositionSource {
    pub fn new(cfg: UdpConfig) -> Self { Self { cfg } }
}

#[async_trait::async_trait]
impl PositionSource for UdpPositionSource {
    async fn run(&self, tx: PositionTx) -> Result<(), GeoError> {
        let socket = UdpSocket::bind(&self.cfg.bind_addr).await
            .map_err(|e| GeoError::from_io(e, &format!("bind {}", self.cfg.bind_addr)))?;
        info!("listening for position fixes on {}", self.cfg.bind_addr);

        let mut watchdog = Watchdog::new(self.cfg.watch.clone(), Instant::now());
        let mut buf = vec![0u8; 512];
        loop {
            let event = tokio::select! {
                _ = tokio::time::sleep_until(watchdog.deadline()) => {
                    GeoEvent::Error(watchdog.on_timeout(Instant::now()))
                }
                res = socket.recv_from(&mut buf) => {
                    let (len, peer) = res.map_err(|e| GeoError::from_io(e, "recv"))?;
                    let Some(sample) = parse_packet(&buf[..len]) else {
                        debug!("dropping malformed datagram ({len} bytes) from {peer}");
                        continue;
                    };
                    if watchdog.is_stale(&sample, unix_now_ms()) {
                        debug!("dropping stale fix from {peer} (t={})", sample.timestamp_ms);
                        continue;
                    }
                    watchdog.on_fix(Instant::now());
                    GeoEvent::Fix(sample)
                }
            };
            if tx.send(event).is_err() {
                // receiver released the watch
                return Ok(());
            }
        }
    }
}

// Datagram layout, little endian:
// 0x00 magic "SPTR" | 0x04 version u8 | 0x05 flags u8 | 0x06 latitude f64
// 0x0E longitude f64 | 0x16 speed m/s f32 | 0x1A heading deg f32 | 0x1E timestamp ms i64
const MAGIC: &[u8; 4] = b"SPTR";
const VERSION: u8 = 1;
const PACKET_LEN: usize = 38;
const FLAG_SPEED: u8 = 1 << 0;
const FLAG_HEADING: u8 = 1 << 1;

fn parse_packet(buf: &[u8]) -> Option<PositionSample> {
    if buf.len() < PACKET_LEN || &buf[..4] != MAGIC || buf[4] != VERSION {
        return None;
    }
    let flags = buf[5];
    let mut c = Cursor::new(&buf[6..PACKET_LEN]);
    let latitude = c.read_f64::<LittleEndian>().ok()?;
    let longitude = c.read_f64::<LittleEndian>().ok()?;
    let speed = c.read_f32::<LittleEndian>().ok()?;
    let heading = c.read_f32::<LittleEndian>().ok()?;
    let timestamp_ms = c.read_i64::<LittleEndian>().ok()?;

    let coordinate = Coordinate::new(latitude, longitude).ok()?;
    let finite = |v: f32| (v.is_finite()).then_some(v as f64);
    Some(PositionSample {
        coordinate,
        instant_speed_mps: if flags & FLAG_SPEED != 0 { finite(speed) } else { None },
        heading_deg: if flags & FLAG_HEADING != 0 { finite(heading) } else { None },
        timestamp_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn packet(flags: u8, lat: f64, lon: f64, speed: f32, heading: f32, ts: i64) -> Vec<u8> {
        let mut v = MAGIC.to_vec();
        v.push(VERSION);
        v.push(flags);
        v.write_f64::<LittleEndian>(lat).unwrap();
        v.write_f64::<LittleEndian>(lon).unwrap();
        v.write_f32::<LittleEndian>(speed).unwrap();
        v.write_f32::<LittleEndian>(heading).unwrap();
        v.write_i64::<LittleEndian>(ts).unwrap();
        v
    }

    #[test]
    fn parses_full_fix() {
        let s = parse_packet(&packet(FLAG_SPEED | FLAG_HEADING, 42.6977, 23.3219, 13.5, 270.0, 1_700_000_000_123)).unwrap();
        assert_eq!(s.coordinate, Coordinate { latitude: 42.6977, longitude: 23.3219 });
        assert_eq!(s.instant_speed_mps, Some(13.5));
        assert_eq!(s.heading_deg, Some(270.0));
        assert_eq!(s.timestamp_ms, 1_700_000_000_123);
    }

    #[test]
    fn absent_fields_follow_flags() {
        let s = parse_packet(&packet(0, 42.0, 23.0, 13.5, 90.0, 5)).unwrap();
        assert_eq!(s.instant_speed_mps, None);
        assert_eq!(s.heading_deg, None);

        let s = parse_packet(&packet(FLAG_SPEED, 42.0, 23.0, f32::NAN, 0.0, 5)).unwrap();
        assert_eq!(s.instant_speed_mps, None);
    }

    #[test]
    fn rejects_garbage() {
        let good = packet(0, 42.0, 23.0, 0.0, 0.0, 5);
        assert!(parse_packet(&good[..PACKET_LEN - 1]).is_none());

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        assert!(parse_packet(&bad_magic).is_none());

        let mut bad_version = good;
        bad_version[4] = 9;
        assert!(parse_packet(&bad_version).is_none());

        assert!(parse_packet(&packet(0, 95.0, 23.0, 0.0, 0.0, 5)).is_none());
    }

    #[tokio::test]
    async fn receives_fixes_over_udp() {
        let cfg = UdpConfig { bind_addr: "127.0.0.1:0".into(), ..Default::default() };
        // bind first to learn a free port, then hand it to the source
        let probe = std::net::UdpSocket::bind(&cfg.bind_addr).unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let (tx, rx) = channel();
        let handle = WatchHandle::spawn(UdpPositionSource::new(UdpConfig { bind_addr: addr.to_string(), ..cfg }), tx);

        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ts = unix_now_ms();
        let fix = tokio::task::spawn_blocking(move || rx.recv_timeout(std::time::Duration::from_secs(5)));
        for _ in 0..20 {
            sender.send_to(&packet(FLAG_SPEED, 42.0, 23.0, 10.0, 0.0, ts), addr).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            if fix.is_finished() {
                break;
            }
        }
        let event = fix.await.unwrap().unwrap();
        assert!(matches!(event, GeoEvent::Fix(s) if s.instant_speed_mps == Some(10.0)));
        drop(handle);
    }
}
