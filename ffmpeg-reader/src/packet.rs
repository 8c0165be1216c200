use ffmpeg_next::Rational;

/// A compressed unit of data read from a source, belonging to exactly one
/// source stream.
pub trait SourcePacket {
    fn stream_index(&self) -> usize;
}

pub struct RawPacket {
    packet: ffmpeg_next::codec::packet::Packet,
    time_base: Rational,
}

unsafe impl Send for RawPacket {}

impl RawPacket {
    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn set_time_base(&mut self, time_base: Rational) {
        self.time_base = time_base;
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::codec::packet::Packet {
        &mut self.packet
    }

    pub fn packet(&self) -> &ffmpeg_next::codec::packet::Packet {
        &self.packet
    }
}

impl SourcePacket for RawPacket {
    fn stream_index(&self) -> usize {
        self.packet.stream()
    }
}

impl From<(ffmpeg_next::codec::packet::Packet, Rational)> for RawPacket {
    fn from((packet, time_base): (ffmpeg_next::codec::packet::Packet, Rational)) -> Self {
        Self { packet, time_base }
    }
}
