use crate::{
    crc::{calculate_crc16, calculate_crc8},
    error::PacketError,
};

// https://tellopilots.com/wiki/protocol/

pub(crate) const MSG_HDR: u8 = 0xcc;
const MIN_PKT_SZ: usize = 11;

const PT_DATA1: u8 = 2;
const PT_DATA2: u8 = 4;
const PT_SET: u8 = 5;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vbr {
    Auto = 0, // let the Tello choose the best for the current connection
    Vbr1M,    // 1Mbps
    Vbr1M5,   // 1.5Mbps
    Vbr2M,    // 2Mbps
    Vbr3M,    // 3Mbps
    Vbr4M,    // 4Mbps
}

// Tello message IDs, only the ones this crate talks

const MSG_SET_VIDEO_BITRATE: u16 = 0x0020; // 32
const MSG_QUERY_VIDEO_SPSPPS: u16 = 0x0025; // 37
const MSG_EXPOSURE_VALS: u16 = 0x0034; // 52
pub(crate) const MSG_SET_DATE_TIME: u16 = 0x0046; // 70
pub(crate) const MSG_DO_TAKEOFF: u16 = 0x0054; // 84
pub(crate) const MSG_DO_LAND: u16 = 0x0055; // 85
pub(crate) const MSG_FLIGHT_STATUS: u16 = 0x0056; // 86
pub(crate) const MSG_LOG_HEADER: u16 = 0x1050; // 4176
pub(crate) const MSG_LOG_DATA: u16 = 0x1051; // 4177

/// Control commands the autopilot issues to the drone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TakeOff,
    Land,
    /// Asks the drone for SPS/PPS which (re)starts the video stream for a while.
    StartVideo,
    SetVideoBitrate(Vbr),
    SetExposure(u8),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::TakeOff => "takeoff",
            Command::Land => "land",
            Command::StartVideo => "start_video",
            Command::SetVideoBitrate(_) => "set_video_bitrate",
            Command::SetExposure(_) => "set_exposure",
        }
    }

    /// Whether the command consumes a control sequence number.
    pub(crate) fn sequenced(&self) -> bool {
        !matches!(self, Command::StartVideo)
    }

    #[must_use]
    pub fn encode(&self, seq: u16) -> Vec<u8> {
        match *self {
            Command::TakeOff => do_takeoff(seq),
            Command::Land => do_land(seq),
            Command::StartVideo => query_video_spsfps(),
            Command::SetVideoBitrate(bitrate) => set_vbr(seq, bitrate),
            Command::SetExposure(level) => set_exposure(seq, level),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
#[allow(dead_code)]
pub struct TelloPacket {
    header: u8,
    size13: u16,
    crc8: u8,
    from_drone: bool, // the following 4 fields are encoded in a single byte in the raw packet
    to_drone: bool,
    packet_type: u8,    // 3-bit
    packet_subtype: u8, // 3-bit
    pub message_id: u16,
    sequence: u16,
    pub payload: Vec<u8>,
    crc16: u16,
}

impl TelloPacket {
    pub fn new(packet_type: u8, cmd: u16, sequence: u16, param: Option<u8>) -> Self {
        let payload = param.map(|p| vec![p]).unwrap_or_default();
        Self::new_with_payload(packet_type, cmd, sequence, payload)
    }

    fn new_with_payload(packet_type: u8, cmd: u16, sequence: u16, payload: Vec<u8>) -> Self {
        Self {
            header: MSG_HDR,
            size13: 0,
            crc8: 0,
            from_drone: false,
            to_drone: true,
            packet_type,
            packet_subtype: 0,
            message_id: cmd,
            sequence,
            payload,
            crc16: 0,
        }
    }

    pub fn ack_log(sequence: u16, id: &[u8; 2]) -> Self {
        let payload = vec![0, id[0], id[1]];
        Self::new_with_payload(PT_DATA1, MSG_LOG_HEADER, sequence, payload)
    }

    #[must_use]
    pub fn to_buffer(&self) -> Vec<u8> {
        let payload_size = self.payload.len();
        let packet_size = MIN_PKT_SZ + payload_size;
        let mut buff = Vec::with_capacity(packet_size);

        buff.push(self.header);
        buff.push((packet_size << 3) as u8);
        buff.push((packet_size >> 5) as u8);
        buff.push(calculate_crc8(&buff[0..3]));
        let mut flags = self.packet_subtype + (self.packet_type << 3);
        if self.to_drone {
            flags |= 0x40;
        }
        if self.from_drone {
            flags |= 0x80;
        }
        buff.push(flags);
        buff.extend_from_slice(&self.message_id.to_le_bytes());
        buff.extend_from_slice(&self.sequence.to_le_bytes());
        buff.extend_from_slice(&self.payload);
        let crc16 = calculate_crc16(&buff);
        buff.extend_from_slice(&crc16.to_le_bytes());

        buff
    }

    /// Parses a control packet received from the drone. CRC mismatches are
    /// logged but tolerated, truncated or oversized packets are rejected.
    pub fn from_buffer(buff: &[u8]) -> Result<Self, PacketError> {
        let method_name = "from_buffer";
        if buff.len() < MIN_PKT_SZ {
            return Err(PacketError::TooShort(buff.len()));
        }
        if buff[0] != MSG_HDR {
            return Err(PacketError::BadHeader(buff[0]));
        }
        let pkt_sz = (u16::from_le_bytes([buff[1], buff[2]]) >> 3) as usize;
        if pkt_sz < MIN_PKT_SZ || pkt_sz > buff.len() {
            return Err(PacketError::BadSize {
                declared: pkt_sz,
                actual: buff.len(),
            });
        }
        let payload_sz = pkt_sz - MIN_PKT_SZ;
        let crc16 = u16::from_le_bytes([buff[pkt_sz - 2], buff[pkt_sz - 1]]);
        let crc8 = calculate_crc8(&buff[0..3]);
        let calc_crc16 = calculate_crc16(&buff[0..9 + payload_sz]);
        if calc_crc16 != crc16 {
            tracing::warn!(method_name, "mismatched crc16: {crc16} != {calc_crc16}");
        }
        if buff[3] != crc8 {
            tracing::warn!(method_name, "mismatched crc8: {crc8} != {}", buff[3]);
        }
        tracing::trace!(method_name, payload_sz, "create pkt from buffer");
        Ok(Self {
            header: buff[0],
            size13: pkt_sz as u16,
            crc8: buff[3],
            from_drone: (buff[4] & 0x80) != 0,
            to_drone: (buff[4] & 0x40) != 0,
            packet_type: (buff[4] >> 3) & 0x07,
            packet_subtype: buff[4] & 0x07,
            message_id: u16::from_le_bytes([buff[5], buff[6]]),
            sequence: u16::from_le_bytes([buff[7], buff[8]]),
            payload: buff[9..9 + payload_sz].to_vec(),
            crc16,
        })
    }
}

#[must_use]
pub fn do_takeoff(seq: u16) -> Vec<u8> {
    TelloPacket::new(PT_SET, MSG_DO_TAKEOFF, seq, None).to_buffer()
}

#[must_use]
pub fn do_land(seq: u16) -> Vec<u8> {
    TelloPacket::new(PT_SET, MSG_DO_LAND, seq, Some(0)).to_buffer()
}

#[must_use]
pub fn query_video_spsfps() -> Vec<u8> {
    TelloPacket::new(
        PT_DATA2,
        MSG_QUERY_VIDEO_SPSPPS,
        0, /* not ctrl seq here! */
        None,
    )
    .to_buffer()
}

#[must_use]
pub fn set_vbr(seq: u16, bitrate: Vbr) -> Vec<u8> {
    TelloPacket::new(PT_SET, MSG_SET_VIDEO_BITRATE, seq, Some(bitrate as u8)).to_buffer()
}

#[must_use]
pub fn set_exposure(seq: u16, level: u8) -> Vec<u8> {
    TelloPacket::new(PT_SET, MSG_EXPOSURE_VALS, seq, Some(level)).to_buffer()
}

#[must_use]
pub fn connect(video_port: u16) -> Vec<u8> {
    //con_req:lh
    let mut buff = b"conn_req:".to_vec();
    buff.extend_from_slice(&video_port.to_le_bytes());
    buff
}

#[must_use]
pub fn send_date_time(
    seq: u16,
    year: u16,
    month: u16,
    day: u16,
    hour: u16,
    minute: u16,
    second: u16,
    ms: u16,
) -> Vec<u8> {
    let method_name = "send_date_time";
    tracing::debug!(
        method_name,
        year,
        month,
        day,
        hour,
        minute,
        second,
        ms,
        "forming set time packet"
    );
    let mut payload = vec![0]; // reserved
    for v in [year, month, day, hour, minute, second, ms] {
        payload.extend_from_slice(&v.to_le_bytes());
    }
    TelloPacket::new_with_payload(PT_DATA1, MSG_SET_DATE_TIME, seq, payload).to_buffer()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_do_takeoff() {
        let pkt = do_takeoff(123);
        assert_eq!(vec![204, 88, 0, 124, 104, 84, 0, 123, 0, 222, 157], pkt);
    }

    #[test]
    fn test_do_land() {
        let pkt = do_land(123);
        assert_eq!(vec![204, 96, 0, 39, 104, 85, 0, 123, 0, 0, 0, 71], pkt);
    }

    #[test]
    fn test_query_video_spsfps() {
        let pkt = query_video_spsfps();
        assert_eq!(vec![204, 88, 0, 124, 96, 37, 0, 0, 0, 108, 149], pkt);
    }

    #[test]
    fn test_set_vbr() {
        assert_eq!(
            vec![204, 96, 0, 39, 104, 32, 0, 123, 0, 5, 10, 35],
            set_vbr(123, Vbr::Vbr4M)
        );
        assert_eq!(
            vec![204, 96, 0, 39, 104, 32, 0, 123, 0, 0, 167, 116],
            set_vbr(123, Vbr::Auto)
        );
    }

    #[test]
    fn test_set_exposure() {
        let pkt = set_exposure(123, 0);
        assert_eq!(vec![204, 96, 0, 39, 104, 52, 0, 123, 0, 0, 247, 237], pkt);
    }

    #[test]
    fn test_ack_log_header() {
        let id: &[u8; 2] = &[0x22, 0x33];
        let pkt = TelloPacket::ack_log(123, id).to_buffer();
        assert_eq!(
            vec![204, 112, 0, 203, 80, 80, 16, 123, 0, 0, 34, 51, 224, 179],
            pkt
        );
    }

    #[test]
    fn test_send_date_time() {
        let pkt = send_date_time(7, 2024, 10, 18, 13, 5, 9, 300);
        assert_eq!(
            vec![
                204, 208, 0, 37, 80, 70, 0, 7, 0, 0, 232, 7, 10, 0, 18, 0, 13, 0, 5, 0, 9, 0, 44,
                1, 51, 47
            ],
            pkt
        );
    }

    #[test]
    fn test_connect() {
        let pkt = connect(8899);
        assert_eq!(vec![99, 111, 110, 110, 95, 114, 101, 113, 58, 195, 34], pkt);
    }

    #[test]
    fn test_command_encode() {
        assert_eq!(do_takeoff(5), Command::TakeOff.encode(5));
        assert_eq!(query_video_spsfps(), Command::StartVideo.encode(5));
        assert!(!Command::StartVideo.sequenced());
        assert!(Command::Land.sequenced());
    }

    #[test]
    fn test_from_buffer() {
        let pkt = TelloPacket::from_buffer(&do_land(123)).expect("valid packet");
        assert_eq!(MSG_DO_LAND, pkt.message_id);
        assert_eq!(vec![0], pkt.payload);
        assert_eq!(123, pkt.sequence);
        assert!(pkt.to_drone);
        assert!(!pkt.from_drone);
    }

    #[test]
    fn test_from_buffer_rejects_garbage() {
        assert_eq!(
            Err(PacketError::TooShort(2)),
            TelloPacket::from_buffer(&[0xcc, 0x58])
        );
        assert_eq!(
            Err(PacketError::BadHeader(b'c')),
            TelloPacket::from_buffer(b"conn_ack:\x00\x00")
        );
        // announces 30 bytes but only 11 are there
        let mut pkt = do_takeoff(1);
        pkt[1] = (30 << 3) as u8;
        assert_eq!(
            Err(PacketError::BadSize {
                declared: 30,
                actual: 11
            }),
            TelloPacket::from_buffer(&pkt)
        );
    }
}
