// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use midly::live::LiveEvent;
use midly::num::{u4, u7};
use midly::MidiMessage;

/// Controller number for "all sound off".
pub const CC_ALL_SOUND_OFF: u8 = 120;
/// Controller number for "all notes off".
pub const CC_ALL_NOTES_OFF: u8 = 123;

/// A MIDI channel message positioned within an audio block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimedMessage {
    /// Frame offset from the start of the block.
    pub sample_offset: usize,
    pub channel: u4,
    pub message: MidiMessage,
}

/// The MIDI messages for one audio block, kept in time order.
#[derive(Clone, Debug, Default)]
pub struct MidiBuffer {
    messages: Vec<TimedMessage>,
    all_notes_off: bool,
}

impl MidiBuffer {
    pub fn new() -> MidiBuffer {
        MidiBuffer::default()
    }

    pub fn with_capacity(capacity: usize) -> MidiBuffer {
        MidiBuffer {
            messages: Vec::with_capacity(capacity),
            all_notes_off: false,
        }
    }

    /// Adds a message. Messages at the same offset keep the order they were added in.
    pub fn add(&mut self, sample_offset: usize, channel: u4, message: MidiMessage) {
        let index = self
            .messages
            .partition_point(|m| m.sample_offset <= sample_offset);
        self.messages.insert(
            index,
            TimedMessage {
                sample_offset,
                channel,
                message,
            },
        );
    }

    /// Parses and adds raw MIDI bytes. Anything other than a channel message is ignored.
    pub fn add_raw(&mut self, sample_offset: usize, raw: &[u8]) -> Result<(), midly::Error> {
        if let LiveEvent::Midi { channel, message } = LiveEvent::parse(raw)? {
            self.add(sample_offset, channel, message);
        }
        Ok(())
    }

    /// Flags the block as silencing every voice before its messages are handled.
    pub fn set_all_notes_off(&mut self) {
        self.all_notes_off = true;
    }

    pub fn is_all_notes_off(&self) -> bool {
        self.all_notes_off
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.all_notes_off = false;
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && !self.all_notes_off
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimedMessage> {
        self.messages.iter()
    }
}

pub fn note_on(key: u8, vel: u8) -> MidiMessage {
    MidiMessage::NoteOn {
        key: u7::from_int_lossy(key),
        vel: u7::from_int_lossy(vel),
    }
}

pub fn note_off(key: u8) -> MidiMessage {
    MidiMessage::NoteOff {
        key: u7::from_int_lossy(key),
        vel: u7::from_int_lossy(0),
    }
}

pub fn control_change(controller: u8, value: u8) -> MidiMessage {
    MidiMessage::Controller {
        controller: u7::from_int_lossy(controller),
        value: u7::from_int_lossy(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_stay_sorted() {
        let mut buffer = MidiBuffer::new();
        let channel = u4::from_int_lossy(0);
        buffer.add(100, channel, note_on(60, 100));
        buffer.add(10, channel, note_on(61, 100));
        buffer.add(100, channel, note_off(60));
        buffer.add(50, channel, note_on(62, 100));

        let order: Vec<_> = buffer.iter().map(|m| (m.sample_offset, m.message)).collect();
        assert_eq!(
            order,
            vec![
                (10, note_on(61, 100)),
                (50, note_on(62, 100)),
                (100, note_on(60, 100)),
                (100, note_off(60)),
            ]
        );
    }

    #[test]
    fn test_add_raw() -> Result<(), midly::Error> {
        let mut buffer = MidiBuffer::with_capacity(4);
        buffer.add_raw(5, &[0x91, 64, 90])?;
        // System realtime messages are skipped.
        buffer.add_raw(6, &[0xF8])?;

        assert_eq!(buffer.len(), 1);
        let message = buffer.iter().next().expect("one message");
        assert_eq!(message.channel, u4::from_int_lossy(1));
        assert_eq!(message.message, note_on(64, 90));
        Ok(())
    }

    #[test]
    fn test_all_notes_off_flag() {
        let mut buffer = MidiBuffer::new();
        assert!(buffer.is_empty());
        buffer.set_all_notes_off();
        assert!(!buffer.is_empty());
        assert!(buffer.is_all_notes_off());
        buffer.clear();
        assert!(!buffer.is_all_notes_off());
    }
}
