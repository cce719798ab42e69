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

//! The sampler: owns the sound list, rebuilds the live library from it and turns
//! MIDI into audio.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use midly::MidiMessage;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::envelope::{EnvelopeParameters, SharedEnvelopeParameters};
use super::library::{build_sounds, RebuildStats, MAX_SOUNDS};
use super::midi::{MidiBuffer, CC_ALL_NOTES_OFF, CC_ALL_SOUND_OFF};
use super::notes::NoteSet;
use super::pool::VoicePool;
use super::sound::{Sound, DEFAULT_KEY_NOTE, DEFAULT_NOTE_SPAN};
use super::state::{SoundEntry, SoundList};
use super::voice::{scratch_buffer, Voice, VoiceStart, MAX_OUTPUT_CHANNELS};
use crate::audio::AudioBuffer;
use crate::config::error::ConfigError;
use crate::config::sampler::SamplerConfig;
use crate::media::file::FileMediaResolver;
use crate::media::{MediaResolver, ProjectItemId};

/// Returned by [Sampler::add_sound] when the sound list is full.
pub const TOO_MANY_SOUNDS: &str = "Can't load any more samples";

/// Released notes never stop sooner than this many frames after their note off.
const MIN_RELEASE_FRAMES: i64 = 8;

/// Frames a note released through [Sampler::play_notes] keeps playing before its fade tail.
const PLAY_NOTES_TAIL: i64 = 8;

/// Velocity of notes started through [Sampler::play_notes].
const PLAY_NOTES_VELOCITY: f32 = 0.75;

const DEFAULT_SAMPLE_RATE: f64 = 44100.0;

/// How often the rebuild thread checks whether its sampler is gone.
const REBUILD_POLL: Duration = Duration::from_millis(100);

/// A sound's use of a source, for re-pointing sounds at moved or copied media.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferencedItem {
    pub source: String,
    /// Seconds into the source where the sound starts.
    pub start_time: f64,
    /// Seconds of the source used. Zero means to the end.
    pub length: f64,
}

/// Everything the render path touches, behind one lock.
struct Live {
    sounds: Arc<[Sound]>,
    pool: VoicePool,
    highlighted: NoteSet,
    scratch: AudioBuffer,
    sample_rate: f64,
}

impl Live {
    /// Starts a voice for every playable sound mapped to the note, until the pool is full.
    fn start_note(&mut self, note: u8, velocity: f32, delay: usize, envelope: EnvelopeParameters) {
        let mut started = false;
        for sound in self.sounds.iter() {
            if !sound.covers(note as i32) || !sound.is_playable() {
                continue;
            }
            if self.pool.is_full() {
                trace!(note, sound = sound.name(), "No free voices, dropping note");
                break;
            }

            started |= self.pool.allocate(Voice::new(
                sound.audio().clone(),
                sound.sample_rate(),
                self.sample_rate,
                envelope,
                VoiceStart {
                    note,
                    key_note: sound.key_note(),
                    gain_db: sound.gain_db(),
                    pan: sound.pan(),
                    open_ended: sound.is_open_ended(),
                    velocity,
                    delay,
                    length: sound.excerpt().length_samples as usize,
                },
            ));
        }
        if started {
            self.highlighted.insert(note);
        }
    }

    /// Shortens and releases every voice playing the note, unless it's open ended.
    fn release_note(&mut self, note: u8, offset: usize, min_frames: i64) {
        for voice in self.pool.iter_mut() {
            if voice.note() == note && !voice.is_open_ended() {
                voice.limit_remaining(min_frames.max(offset as i64));
                voice.trigger_release();
            }
        }
        self.highlighted.remove(note);
    }

    fn stop_all(&mut self) {
        self.pool.clear();
        self.highlighted.clear();
    }

    fn sound(&self, id: u64) -> Option<&Sound> {
        self.sounds.iter().find(|s| s.id() == id)
    }
}

/// A polyphonic sampler that plays excerpts of audio mapped to ranges of notes.
///
/// The sound list is edited from the control side; every edit requests a rebuild
/// of the live library, which is carried out by [Sampler::tick], [Sampler::rebuild]
/// or the thread from [Sampler::spawn_rebuild_thread]. The render side only ever
/// sees complete libraries.
pub struct Sampler {
    live: Mutex<Live>,
    state: Mutex<SoundList>,
    resolver: Arc<dyn MediaResolver>,
    envelope: SharedEnvelopeParameters,
    rebuild_tx: Sender<()>,
    rebuild_rx: Receiver<()>,
    /// Held for the whole of a rebuild.
    rebuild_lock: Mutex<()>,
    media_generation: AtomicU64,
}

impl Sampler {
    /// Creates an empty sampler that finds its media through `resolver`.
    pub fn new(resolver: Arc<dyn MediaResolver>, max_voices: usize) -> Sampler {
        let (rebuild_tx, rebuild_rx) = crossbeam_channel::bounded(1);
        Sampler {
            live: Mutex::new(Live {
                sounds: Arc::from(Vec::new()),
                pool: VoicePool::new(max_voices),
                highlighted: NoteSet::new(),
                scratch: scratch_buffer(),
                sample_rate: DEFAULT_SAMPLE_RATE,
            }),
            state: Mutex::new(SoundList::new()),
            resolver,
            envelope: SharedEnvelopeParameters::default(),
            rebuild_tx,
            rebuild_rx,
            rebuild_lock: Mutex::new(()),
            media_generation: AtomicU64::new(0),
        }
    }

    /// Creates a sampler from its configuration and builds its library.
    /// Relative media paths are resolved against `base_path`.
    pub fn from_config(config: &SamplerConfig, base_path: &Path) -> Result<Sampler, ConfigError> {
        let media_path = match config.media().base_path() {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => base_path.join(path),
            None => base_path.to_path_buf(),
        };
        let resolver = FileMediaResolver::new(&media_path, config.media().project_items()?);

        let sampler = Sampler::new(Arc::new(resolver), config.max_voices());
        sampler.set_envelope(config.envelope());
        sampler.prepare(config.sample_rate() as f64);
        sampler.restore_state(SoundList::from_entries(config.sounds().to_vec()));
        sampler.rebuild();
        Ok(sampler)
    }

    /// Sets the output sample rate. Stops every voice.
    pub fn prepare(&self, sample_rate: f64) {
        let mut live = self.live.lock();
        live.sample_rate = sample_rate;
        live.stop_all();
        debug!(sample_rate, "Sampler prepared");
    }

    pub fn sample_rate(&self) -> f64 {
        self.live.lock().sample_rate
    }

    /// Adds a sound mapped two octaves either side of its key note.
    /// Returns an empty string, or a message saying why the sound couldn't be added.
    pub fn add_sound(
        &self,
        source: &str,
        name: &str,
        start_time: f64,
        length: f64,
        gain_db: f32,
    ) -> String {
        let mut state = self.state.lock();
        if state.len() >= MAX_SOUNDS {
            warn!(source, name, max = MAX_SOUNDS, "Sound list is full");
            return TOO_MANY_SOUNDS.to_string();
        }
        state.push(SoundEntry::new(source, name, start_time, length, gain_db));
        drop(state);

        debug!(source, name, "Sound added");
        self.request_rebuild();
        String::new()
    }

    /// Removes a sound and stops every voice.
    pub fn remove_sound(&self, index: usize) {
        let removed = self.state.lock().remove(index);
        if removed.is_none() {
            return;
        }
        self.live.lock().stop_all();
        self.request_rebuild();
    }

    pub fn num_sounds(&self) -> usize {
        self.state.lock().len()
    }

    pub fn sound_name(&self, index: usize) -> String {
        self.entry(index, |e| e.name.clone()).unwrap_or_default()
    }

    /// The source of the sound in the live library.
    pub fn sound_media(&self, index: usize) -> String {
        self.live_sound(index, |s| s.source().to_string())
            .unwrap_or_default()
    }

    pub fn sound_gain_db(&self, index: usize) -> f32 {
        self.entry(index, |e| e.gain_db).unwrap_or_default()
    }

    pub fn sound_pan(&self, index: usize) -> f32 {
        self.entry(index, |e| e.pan).unwrap_or_default()
    }

    pub fn is_sound_open_ended(&self, index: usize) -> bool {
        self.entry(index, |e| e.open_ended).unwrap_or_default()
    }

    pub fn sound_start_time(&self, index: usize) -> f64 {
        self.entry(index, |e| e.start_time).unwrap_or_default()
    }

    /// The excerpt length in seconds. When the sound plays to the end of its source
    /// this is the length of the decoded excerpt.
    pub fn sound_length(&self, index: usize) -> f64 {
        let length = self.entry(index, |e| e.length).unwrap_or_default();
        if length > 0.0 {
            return length;
        }
        self.live_sound(index, |s| s.excerpt().length)
            .unwrap_or(length)
    }

    /// The key note of a sound, as resolved by the live library when it's been built.
    pub fn key_note(&self, index: usize) -> i32 {
        self.live_sound(index, |s| s.key_note())
            .or_else(|| self.entry(index, |e| e.key_note.unwrap_or(DEFAULT_KEY_NOTE)))
            .unwrap_or_default()
    }

    pub fn min_key(&self, index: usize) -> i32 {
        self.live_sound(index, |s| s.min_note())
            .or_else(|| {
                self.entry(index, |e| {
                    e.min_note
                        .unwrap_or(e.key_note.unwrap_or(DEFAULT_KEY_NOTE) - DEFAULT_NOTE_SPAN)
                        .clamp(0, 127)
                })
            })
            .unwrap_or_default()
    }

    pub fn max_key(&self, index: usize) -> i32 {
        self.live_sound(index, |s| s.max_note())
            .or_else(|| {
                self.entry(index, |e| {
                    e.max_note
                        .unwrap_or(e.key_note.unwrap_or(DEFAULT_KEY_NOTE) + DEFAULT_NOTE_SPAN)
                        .clamp(0, 127)
                })
            })
            .unwrap_or_default()
    }

    pub fn set_sound_name(&self, index: usize, name: &str) {
        self.update(index, |e| e.name = name.to_string());
    }

    /// Sets the key note and the range of notes a sound plays for.
    pub fn set_sound_params(&self, index: usize, key_note: i32, min_note: i32, max_note: i32) {
        self.update(index, |e| {
            e.key_note = Some(key_note.clamp(0, 127));
            e.min_note = Some(min_note.min(max_note).clamp(0, 127));
            e.max_note = Some(min_note.max(max_note).clamp(0, 127));
        });
    }

    pub fn set_sound_gains(&self, index: usize, gain_db: f32, pan: f32) {
        self.update(index, |e| {
            e.gain_db = gain_db.clamp(-48.0, 48.0);
            e.pan = pan.clamp(-1.0, 1.0);
        });
    }

    pub fn set_sound_excerpt(&self, index: usize, start_time: f64, length: f64) {
        self.update(index, |e| {
            e.start_time = start_time;
            e.length = length;
        });
    }

    pub fn set_sound_open_ended(&self, index: usize, open_ended: bool) {
        self.update(index, |e| e.open_ended = open_ended);
    }

    pub fn set_sound_media(&self, index: usize, source: &str) {
        self.update(index, |e| e.source = source.to_string());
    }

    /// Makes exactly `keys` sound, as when notes are auditioned from a keyboard
    /// display. Notes no longer held stop almost at once, and new ones start at a
    /// fixed velocity.
    pub fn play_notes(&self, keys: &NoteSet) {
        let envelope = self.envelope.load();
        let mut live = self.live.lock();
        let live = &mut *live;

        for voice in live.pool.iter_mut() {
            let note = voice.note();
            if live.highlighted.contains(note) && !keys.contains(note) && !voice.is_open_ended() {
                voice.limit_remaining(PLAY_NOTES_TAIL);
            }
        }
        for note in keys.iter().rev() {
            if !live.highlighted.contains(note) {
                live.start_note(note, PLAY_NOTES_VELOCITY, 0, envelope);
            }
        }
        live.highlighted = *keys;
    }

    /// Stops every voice immediately.
    pub fn all_notes_off(&self) {
        self.live.lock().stop_all();
    }

    pub fn active_voices(&self) -> usize {
        self.live.lock().pool.len()
    }

    /// Notes currently held.
    pub fn highlighted_notes(&self) -> NoteSet {
        self.live.lock().highlighted
    }

    /// Names of the sounds mapped to a note, joined with " + ".
    pub fn note_name(&self, note: u8) -> String {
        self.library()
            .iter()
            .filter(|s| s.covers(note as i32))
            .map(|s| s.name())
            .collect::<Vec<_>>()
            .join(" + ")
    }

    /// Voices write to no more than two channels.
    pub fn output_channels_given_inputs(&self, inputs: usize) -> usize {
        inputs.min(MAX_OUTPUT_CHANNELS)
    }

    pub fn envelope(&self) -> EnvelopeParameters {
        self.envelope.load()
    }

    /// Sets the envelope used by voices started from now on.
    pub fn set_envelope(&self, parameters: EnvelopeParameters) {
        self.envelope.store(parameters);
    }

    pub fn attack(&self) -> f32 {
        self.envelope.attack()
    }

    pub fn set_attack(&self, seconds: f32) {
        self.envelope.set_attack(seconds);
    }

    pub fn decay(&self) -> f32 {
        self.envelope.decay()
    }

    pub fn set_decay(&self, seconds: f32) {
        self.envelope.set_decay(seconds);
    }

    pub fn sustain(&self) -> f32 {
        self.envelope.sustain()
    }

    pub fn set_sustain(&self, level: f32) {
        self.envelope.set_sustain(level);
    }

    pub fn release(&self) -> f32 {
        self.envelope.release()
    }

    pub fn set_release(&self, seconds: f32) {
        self.envelope.set_release(seconds);
    }

    /// A copy of the sound list.
    pub fn sound_list(&self) -> SoundList {
        self.state.lock().clone()
    }

    /// Replaces the whole sound list. Sounds beyond the limit are dropped.
    pub fn restore_state(&self, mut sounds: SoundList) {
        if sounds.len() > MAX_SOUNDS {
            warn!(
                sounds = sounds.len(),
                max = MAX_SOUNDS,
                "Too many sounds, ignoring the rest"
            );
            sounds.truncate(MAX_SOUNDS);
        }
        *self.state.lock() = sounds;
        self.request_rebuild();
    }

    /// The live library.
    pub fn library(&self) -> Arc<[Sound]> {
        self.live.lock().sounds.clone()
    }

    /// The media each sound uses, in sound order.
    pub fn referenced_items(&self) -> Vec<ReferencedItem> {
        self.state
            .lock()
            .iter()
            .map(|e| ReferencedItem {
                source: e.source.clone(),
                start_time: e.start_time,
                length: e.length,
            })
            .collect()
    }

    /// Points the sound using `item` at project media `new_id`, whose audio begins
    /// `new_start_time` seconds into the old source. Returns false if no sound uses `item`.
    pub fn reassign_referenced_item(
        &self,
        item: &ReferencedItem,
        new_id: ProjectItemId,
        new_start_time: f64,
    ) -> bool {
        let index = self.referenced_items().iter().position(|r| r == item);
        let Some(index) = index else {
            warn!(source = item.source, "No sound uses referenced item");
            return false;
        };
        self.update(index, |e| {
            e.source = new_id.to_string();
            e.start_time -= new_start_time;
        });
        true
    }

    /// Forgets all decoded audio and reads every source again.
    pub fn source_media_changed(&self) {
        self.media_generation.fetch_add(1, Ordering::AcqRel);
        self.resolver.invalidate();
        self.request_rebuild();
    }

    /// Asks for the library to be rebuilt. Requests made before the rebuild starts
    /// are merged into one.
    pub fn request_rebuild(&self) {
        let _ = self.rebuild_tx.try_send(());
    }

    /// Rebuilds the library if one has been requested. Returns whether it did.
    pub fn tick(&self) -> bool {
        if self.rebuild_rx.try_recv().is_err() {
            return false;
        }
        self.rebuild();
        true
    }

    /// Rebuilds the live library from the sound list and swaps it in, stopping
    /// every voice. Audio is only read for sounds whose content changed.
    pub fn rebuild(&self) -> RebuildStats {
        let _rebuilding = self.rebuild_lock.lock();
        while self.rebuild_rx.try_recv().is_ok() {}

        let entries = self.state.lock().entries().to_vec();
        let previous = self.library();
        let generation = self.media_generation.load(Ordering::Acquire);
        let (sounds, stats) = build_sounds(&entries, &previous, generation, self.resolver.as_ref());
        let sounds: Arc<[Sound]> = sounds.into();

        let replaced = {
            let mut live = self.live.lock();
            live.stop_all();
            std::mem::replace(&mut live.sounds, sounds)
        };
        drop(replaced);
        drop(previous);

        info!(
            sounds = entries.len().min(MAX_SOUNDS),
            reused = stats.reused,
            decoded = stats.decoded,
            unresolved = stats.unresolved,
            "Sound library rebuilt"
        );
        stats
    }

    /// Starts a thread that carries out rebuild requests as they arrive.
    /// The thread exits once the sampler is dropped.
    pub fn spawn_rebuild_thread(sampler: &Arc<Sampler>) -> io::Result<JoinHandle<()>> {
        let weak: Weak<Sampler> = Arc::downgrade(sampler);
        let requests = sampler.rebuild_rx.clone();

        thread::Builder::new()
            .name("keyzone-rebuild".to_string())
            .spawn(move || loop {
                match requests.recv_timeout(REBUILD_POLL) {
                    Ok(()) => match weak.upgrade() {
                        Some(sampler) => {
                            sampler.rebuild();
                        }
                        None => return,
                    },
                    Err(RecvTimeoutError::Timeout) => {
                        if weak.strong_count() == 0 {
                            return;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            })
    }

    /// Adds the sound of every voice into `buffer`.
    pub fn render(&self, buffer: &mut AudioBuffer, start: usize, num: usize) {
        self.process(buffer, start, num, None);
    }

    /// Handles a block's MIDI, then adds the sound of every voice into `buffer`.
    /// Channels past the second are cleared.
    pub fn process(
        &self,
        buffer: &mut AudioBuffer,
        start: usize,
        num: usize,
        midi: Option<&MidiBuffer>,
    ) {
        let envelope = self.envelope.load();
        let mut live = self.live.lock();

        if let Some(midi) = midi {
            if midi.is_all_notes_off() {
                live.stop_all();
            }

            let min_frames =
                ((envelope.release as f64 * live.sample_rate) as i64).max(MIN_RELEASE_FRAMES);
            for timed in midi.iter() {
                match timed.message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        let note = key.as_int();
                        live.release_note(note, timed.sample_offset, min_frames);
                        live.start_note(
                            note,
                            vel.as_int() as f32 / 127.0,
                            timed.sample_offset,
                            envelope,
                        );
                    }
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                        live.release_note(key.as_int(), timed.sample_offset, min_frames);
                    }
                    MidiMessage::Controller { controller, .. }
                        if controller.as_int() == CC_ALL_SOUND_OFF
                            || controller.as_int() == CC_ALL_NOTES_OFF =>
                    {
                        live.stop_all();
                    }
                    _ => {}
                }
            }
        }

        buffer.clear_channels_from(MAX_OUTPUT_CHANNELS, start, num);
        let Live { pool, scratch, .. } = &mut *live;
        pool.render(buffer, start, num, scratch);
    }

    fn entry<R>(&self, index: usize, f: impl FnOnce(&SoundEntry) -> R) -> Option<R> {
        self.state.lock().get(index).map(f)
    }

    /// Looks up the live sound built from the entry at `index`.
    fn live_sound<R>(&self, index: usize, f: impl FnOnce(&Sound) -> R) -> Option<R> {
        let id = self.entry(index, |e| e.id())?;
        self.live.lock().sound(id).map(f)
    }

    /// Edits the entry at `index` and requests a rebuild. Does nothing for a stale index.
    fn update(&self, index: usize, f: impl FnOnce(&mut SoundEntry)) {
        let mut state = self.state.lock();
        let Some(entry) = state.get_mut(index) else {
            debug!(index, "No sound at index");
            return;
        };
        f(entry);
        drop(state);
        self.request_rebuild();
    }
}

impl fmt::Debug for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let live = self.live.lock();
        f.debug_struct("Sampler")
            .field("sounds", &self.num_sounds())
            .field("library", &live.sounds.len())
            .field("active_voices", &live.pool.len())
            .field("sample_rate", &live.sample_rate)
            .field("envelope", &self.envelope.load())
            .finish()
    }
}
