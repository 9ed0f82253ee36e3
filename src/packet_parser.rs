use crate::data_manager::DataManager;

/// The application-layer message decoder.
///
/// The frame splitter hands over one complete length-prefixed frame at a
/// time (prefix included) in byte-stream order. Implementations translate a
/// frame into zero or more calls on the [`DataManager`] mutating surface:
/// `add_damage`, `add_healing`, `add_taken_damage`, the identity setters,
/// `add_log` and the enemy-cache mutators. Per-frame decode failures are the
/// decoder's to swallow; the stream keeps flowing either way.
pub trait MessageDecoder: Send {
    fn decode_frame(&mut self, frame: &[u8], sink: &DataManager);
}

/// Stand-in decoder used until a game-protocol decoder is wired up: peels
/// the frame header and reports what went by.
pub struct LoggingDecoder;

impl MessageDecoder for LoggingDecoder {
    fn decode_frame(&mut self, frame: &[u8], _sink: &DataManager) {
        if frame.len() < 6 {
            log::debug!("Short frame: {} bytes", frame.len());
            return;
        }
        let msg_type = u16::from_be_bytes([frame[4], frame[5]]);
        log::debug!("Frame: type=0x{:04x}, {} bytes", msg_type, frame.len());
    }
}
