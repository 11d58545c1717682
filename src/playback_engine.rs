//! # Playback Engine
//!
//! Runs only on the playback node. Owns every decoded clip buffer, the
//! per-clip gain values, and the bookkeeping for active voices, and turns
//! relay commands into audio output plus `sound_started`/`sound_ended`
//! events.
//!
//! ## Clip lifecycle
//!
//! Each clip id moves through `Unloaded -> Loading -> Ready`. Clips load
//! lazily on their first `play`: the decode runs on the blocking thread pool
//! so a slow load never stalls commands for other clips, and the play intent
//! is queued so the clip starts the moment its data arrives. A failed load
//! drops the clip back to `Unloaded` and the next explicit `play` tries
//! again; there is no automatic retry and no global failure state.
//!
//! ## Voices and retriggering
//!
//! A clip has at most one current voice. Playing a clip that is already
//! playing pre-empts the old voice silently (no end event) before the new
//! one starts; this is the rapid-fire contract a cue board needs. Every
//! voice carries a generation tag, and a completion only emits `sound_ended`
//! if its generation is still the clip's current one, so a stale completion
//! can never clobber a newer voice's state.
//!
//! ## Gain
//!
//! A voice's output gain is always `clip_volume * master_volume`. Changing
//! either factor retunes every affected running voice in place, without
//! restarting it.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::audio_backend::{AudioBackend, ClipLoadError, VoiceControl};
use crate::catalog::{self, ClipId};
use crate::protocol::Message;
use crate::settings::GlobalSettings;

/// Commands the playback node feeds into the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// Start (or retrigger) one clip.
    Play(ClipId),
    /// Stop every playing clip, emitting an end event for each.
    StopAll,
    /// Set one clip's volume.
    SetVolume(ClipId, f32),
    /// Set the master volume.
    SetMasterVolume(f32),
    /// Replace all gain values from a full settings snapshot.
    ApplySettings(GlobalSettings),
}

/// Load state of one clip. Absence from the clip map means `Unloaded`.
enum ClipState<C> {
    /// A decode is in flight; `play_queued` records whether a play intent
    /// is waiting on it.
    Loading { play_queued: bool },
    Ready(C),
}

struct ActiveVoice<V> {
    voice: V,
    generation: u64,
}

/// Results delivered back into the engine from spawned tasks.
enum Internal<C> {
    Loaded {
        id: ClipId,
        result: Result<C, ClipLoadError>,
    },
    VoiceFinished {
        id: ClipId,
        generation: u64,
    },
}

/// The playback state machine. Generic over the audio output so tests can
/// script one; the playback binary instantiates it with the kira backend.
pub struct PlaybackEngine<B: AudioBackend> {
    backend: B,
    sounds_dir: PathBuf,
    clips: HashMap<ClipId, ClipState<B::Clip>>,
    voices: HashMap<ClipId, ActiveVoice<B::Voice>>,
    master_volume: f32,
    clip_volumes: HashMap<ClipId, f32>,
    next_generation: u64,
    events: mpsc::UnboundedSender<Message>,
    internal_tx: mpsc::UnboundedSender<Internal<B::Clip>>,
    internal_rx: mpsc::UnboundedReceiver<Internal<B::Clip>>,
}

impl<B: AudioBackend> PlaybackEngine<B> {
    /// Creates an engine that loads clips from `sounds_dir` and emits
    /// `sound_started`/`sound_ended` events on `events`.
    pub fn new(
        backend: B,
        sounds_dir: impl Into<PathBuf>,
        events: mpsc::UnboundedSender<Message>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        PlaybackEngine {
            backend,
            sounds_dir: sounds_dir.into(),
            clips: HashMap::new(),
            voices: HashMap::new(),
            master_volume: 1.0,
            clip_volumes: HashMap::new(),
            next_generation: 0,
            events,
            internal_tx,
            internal_rx,
        }
    }

    /// Consumes commands until the command channel closes.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<EngineCommand>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
            }
        }
    }

    fn handle(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Play(id) => self.play(id),
            EngineCommand::StopAll => self.stop_all(),
            EngineCommand::SetVolume(id, volume) => self.set_volume(id, volume),
            EngineCommand::SetMasterVolume(volume) => self.set_master_volume(volume),
            EngineCommand::ApplySettings(settings) => self.apply_settings(&settings),
        }
    }

    fn play(&mut self, id: ClipId) {
        if let Some(state) = self.clips.get_mut(&id) {
            match state {
                ClipState::Loading { play_queued } => {
                    debug!("{id} still loading, play queued");
                    *play_queued = true;
                    return;
                }
                ClipState::Ready(_) => {}
            }
        } else {
            self.begin_load(id);
            return;
        }
        self.start_voice(&id);
    }

    /// Kicks off the decode for an unloaded clip, queueing the play intent.
    fn begin_load(&mut self, id: ClipId) {
        let Some(name) = catalog::file_name(&id) else {
            warn!("ignoring play for malformed clip id '{id}'");
            return;
        };
        let path = self.sounds_dir.join(name);
        self.clips
            .insert(id.clone(), ClipState::Loading { play_queued: true });

        let tx = self.internal_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = B::load(&path);
            let _ = tx.send(Internal::Loaded { id, result });
        });
    }

    /// Starts a new voice for a `Ready` clip, pre-empting the current one.
    fn start_voice(&mut self, id: &ClipId) {
        let Some(ClipState::Ready(clip)) = self.clips.get(id) else {
            return;
        };
        let clip = clip.clone();

        // Retrigger contract: the old voice dies silently, with no end event.
        if let Some(mut previous) = self.voices.remove(id) {
            previous.voice.stop();
        }

        let gain = self.effective_gain(id);
        let voice = match self.backend.start(&clip, gain) {
            Ok(voice) => voice,
            Err(e) => {
                warn!("could not start voice for {id}: {e}");
                return;
            }
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        self.voices.insert(id.clone(), ActiveVoice { voice, generation });
        let _ = self.events.send(Message::SoundStarted {
            sound_id: id.clone(),
        });

        // Natural-completion watcher. The generation check on arrival makes
        // this a no-op if the voice was pre-empted or stopped in the
        // meantime.
        let duration = B::duration(&clip);
        let tx = self.internal_tx.clone();
        let id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(Internal::VoiceFinished { id, generation });
        });
    }

    fn stop_all(&mut self) {
        let playing: Vec<ClipId> = self.voices.keys().cloned().collect();
        for id in playing {
            if let Some(mut active) = self.voices.remove(&id) {
                active.voice.stop();
                // Controllers clear their highlight off this synthesized end.
                let _ = self.events.send(Message::SoundEnded { sound_id: id });
            }
        }
    }

    fn set_volume(&mut self, id: ClipId, volume: f32) {
        self.clip_volumes.insert(id.clone(), volume);
        if let Some(active) = self.voices.get_mut(&id) {
            active.voice.set_gain(volume * self.master_volume);
        }
    }

    fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume;
        self.retune_voices();
    }

    fn apply_settings(&mut self, settings: &GlobalSettings) {
        self.master_volume = settings.master_volume;
        self.clip_volumes = settings
            .sounds
            .iter()
            .map(|(id, sound)| (id.clone(), sound.volume))
            .collect();
        self.retune_voices();
    }

    fn retune_voices(&mut self) {
        for (id, active) in self.voices.iter_mut() {
            let clip_volume = self.clip_volumes.get(id).copied().unwrap_or(1.0);
            active.voice.set_gain(clip_volume * self.master_volume);
        }
    }

    fn effective_gain(&self, id: &ClipId) -> f32 {
        self.clip_volumes.get(id).copied().unwrap_or(1.0) * self.master_volume
    }

    fn handle_internal(&mut self, internal: Internal<B::Clip>) {
        match internal {
            Internal::Loaded { id, result } => {
                let play_queued = match self.clips.get(&id) {
                    Some(ClipState::Loading { play_queued }) => *play_queued,
                    // The clip resolved some other way; stale result.
                    _ => return,
                };
                match result {
                    Ok(clip) => {
                        self.clips.insert(id.clone(), ClipState::Ready(clip));
                        if play_queued {
                            self.start_voice(&id);
                        }
                    }
                    Err(e) => {
                        warn!("clip load failed: {e}");
                        // Back to Unloaded; the next play starts a fresh load.
                        self.clips.remove(&id);
                    }
                }
            }
            Internal::VoiceFinished { id, generation } => {
                if self.voices.get(&id).map(|v| v.generation) == Some(generation) {
                    self.voices.remove(&id);
                    let _ = self.events.send(Message::SoundEnded { sound_id: id });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_backend::PlaybackError;
    use crate::catalog::clip_id;
    use crate::settings::SoundSettings;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct MockVoiceState {
        name: String,
        gain: Mutex<f32>,
        stopped: AtomicBool,
        released: AtomicBool,
    }

    impl MockVoiceState {
        fn gain(&self) -> f32 {
            *self.gain.lock().unwrap()
        }
        fn audible(&self) -> bool {
            !self.stopped.load(Ordering::SeqCst) && !self.released.load(Ordering::SeqCst)
        }
    }

    struct MockVoice(Arc<MockVoiceState>);

    impl VoiceControl for MockVoice {
        fn set_gain(&mut self, gain: f32) {
            *self.0.gain.lock().unwrap() = gain;
        }
        fn stop(&mut self) {
            self.0.stopped.store(true, Ordering::SeqCst);
        }
    }

    impl Drop for MockVoice {
        fn drop(&mut self) {
            self.0.released.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Clone)]
    struct MockClip {
        name: String,
    }

    /// Records every started voice and flags any moment where two voices of
    /// the same clip were audible at once.
    #[derive(Default)]
    struct MockBackend {
        voices: Arc<Mutex<Vec<Arc<MockVoiceState>>>>,
        overlap: Arc<AtomicBool>,
        fail_start: bool,
    }

    impl AudioBackend for MockBackend {
        type Clip = MockClip;
        type Voice = MockVoice;

        fn load(path: &Path) -> Result<MockClip, ClipLoadError> {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.contains("bad") {
                return Err(ClipLoadError::NoTrack {
                    path: path.to_path_buf(),
                });
            }
            Ok(MockClip { name })
        }

        fn duration(_clip: &MockClip) -> Duration {
            Duration::from_secs(300)
        }

        fn start(&mut self, clip: &MockClip, gain: f32) -> Result<MockVoice, PlaybackError> {
            if self.fail_start {
                return Err(PlaybackError::Output("mock output refused".into()));
            }
            let mut voices = self.voices.lock().unwrap();
            if voices.iter().any(|v| v.name == clip.name && v.audible()) {
                self.overlap.store(true, Ordering::SeqCst);
            }
            let state = Arc::new(MockVoiceState {
                name: clip.name.clone(),
                gain: Mutex::new(gain),
                stopped: AtomicBool::new(false),
                released: AtomicBool::new(false),
            });
            voices.push(Arc::clone(&state));
            Ok(MockVoice(state))
        }
    }

    struct Rig {
        engine: PlaybackEngine<MockBackend>,
        events: mpsc::UnboundedReceiver<Message>,
        voices: Arc<Mutex<Vec<Arc<MockVoiceState>>>>,
        overlap: Arc<AtomicBool>,
    }

    fn rig() -> Rig {
        let backend = MockBackend::default();
        let voices = Arc::clone(&backend.voices);
        let overlap = Arc::clone(&backend.overlap);
        let (tx, events) = mpsc::unbounded_channel();
        Rig {
            engine: PlaybackEngine::new(backend, "/clips", tx),
            events,
            voices,
            overlap,
        }
    }

    impl Rig {
        /// Waits for the in-flight decode result and feeds it to the engine.
        async fn pump_load(&mut self) {
            let internal = self.engine.internal_rx.recv().await.expect("internal channel");
            self.engine.handle_internal(internal);
        }

        fn finish_voice(&mut self, id: &ClipId, generation: u64) {
            self.engine.handle_internal(Internal::VoiceFinished {
                id: id.clone(),
                generation,
            });
        }

        fn drain_events(&mut self) -> Vec<Message> {
            let mut out = Vec::new();
            while let Ok(msg) = self.events.try_recv() {
                out.push(msg);
            }
            out
        }

        fn voice(&self, index: usize) -> Arc<MockVoiceState> {
            Arc::clone(&self.voices.lock().unwrap()[index])
        }

        /// Loads can finish in any order, so gain assertions look voices up
        /// by clip file name rather than start order.
        fn voice_named(&self, name: &str) -> Arc<MockVoiceState> {
            self.voices
                .lock()
                .unwrap()
                .iter()
                .find(|v| v.name == name)
                .map(Arc::clone)
                .expect("no voice for clip")
        }

        fn voice_count(&self) -> usize {
            self.voices.lock().unwrap().len()
        }
    }

    #[tokio::test]
    async fn play_loads_lazily_then_starts_exactly_once() {
        let mut rig = rig();
        let kick = clip_id("kick.wav");

        rig.engine.handle(EngineCommand::Play(kick.clone()));
        // Nothing audible or visible until the decode lands.
        assert!(rig.drain_events().is_empty());
        assert_eq!(rig.voice_count(), 0);

        rig.pump_load().await;
        assert_eq!(
            rig.drain_events(),
            vec![Message::SoundStarted {
                sound_id: kick.clone()
            }]
        );
        assert_eq!(rig.voice_count(), 1);
    }

    #[tokio::test]
    async fn failed_load_emits_nothing_and_allows_retry() {
        let mut rig = rig();
        let bad = clip_id("bad.wav");

        rig.engine.handle(EngineCommand::Play(bad.clone()));
        rig.pump_load().await;
        assert!(rig.drain_events().is_empty());
        assert_eq!(rig.voice_count(), 0);

        // The failure did not poison the clip: the next play loads again.
        rig.engine.handle(EngineCommand::Play(bad.clone()));
        assert!(matches!(
            rig.engine.clips.get(&bad),
            Some(ClipState::Loading { play_queued: true })
        ));
    }

    #[tokio::test]
    async fn failed_load_is_localized_to_one_clip() {
        let mut rig = rig();
        let bad = clip_id("bad.wav");
        let kick = clip_id("kick.wav");

        rig.engine.handle(EngineCommand::Play(bad.clone()));
        rig.engine.handle(EngineCommand::Play(kick.clone()));
        rig.pump_load().await;
        rig.pump_load().await;

        assert_eq!(
            rig.drain_events(),
            vec![Message::SoundStarted { sound_id: kick }]
        );
    }

    #[tokio::test]
    async fn repeated_play_while_loading_starts_one_voice() {
        let mut rig = rig();
        let kick = clip_id("kick.wav");

        rig.engine.handle(EngineCommand::Play(kick.clone()));
        rig.engine.handle(EngineCommand::Play(kick.clone()));
        rig.engine.handle(EngineCommand::Play(kick.clone()));
        rig.pump_load().await;

        assert_eq!(
            rig.drain_events(),
            vec![Message::SoundStarted { sound_id: kick }]
        );
        assert_eq!(rig.voice_count(), 1);
    }

    #[tokio::test]
    async fn retrigger_preempts_silently_and_ends_once() {
        let mut rig = rig();
        let kick = clip_id("kick.wav");

        rig.engine.handle(EngineCommand::Play(kick.clone()));
        rig.pump_load().await;
        rig.engine.handle(EngineCommand::Play(kick.clone()));

        // Two started events, the first voice pre-empted without an end.
        assert_eq!(
            rig.drain_events(),
            vec![
                Message::SoundStarted {
                    sound_id: kick.clone()
                },
                Message::SoundStarted {
                    sound_id: kick.clone()
                },
            ]
        );
        assert!(rig.voice(0).stopped.load(Ordering::SeqCst));
        assert!(!rig.overlap.load(Ordering::SeqCst), "two voices were audible at once");

        // The pre-empted voice's completion is stale and must be a no-op.
        rig.finish_voice(&kick, 1);
        assert!(rig.drain_events().is_empty());

        // The live voice's completion emits exactly one end.
        rig.finish_voice(&kick, 2);
        assert_eq!(
            rig.drain_events(),
            vec![Message::SoundEnded {
                sound_id: kick.clone()
            }]
        );
        // And it is gone: a duplicate completion does nothing.
        rig.finish_voice(&kick, 2);
        assert!(rig.drain_events().is_empty());
    }

    #[tokio::test]
    async fn natural_end_emits_one_ended_event() {
        let mut rig = rig();
        let kick = clip_id("kick.wav");

        rig.engine.handle(EngineCommand::Play(kick.clone()));
        rig.pump_load().await;
        rig.drain_events();

        rig.finish_voice(&kick, 1);
        assert_eq!(
            rig.drain_events(),
            vec![Message::SoundEnded { sound_id: kick }]
        );
        assert!(rig.engine.voices.is_empty());
    }

    #[tokio::test]
    async fn stop_all_ends_each_playing_clip_exactly_once() {
        let mut rig = rig();
        let kick = clip_id("kick.wav");
        let snare = clip_id("snare.wav");
        let idle = clip_id("idle.wav");

        rig.engine.handle(EngineCommand::Play(kick.clone()));
        rig.engine.handle(EngineCommand::Play(snare.clone()));
        rig.pump_load().await;
        rig.pump_load().await;
        // A loaded but idle clip must not produce an end event.
        rig.engine.handle(EngineCommand::Play(idle.clone()));
        rig.pump_load().await;
        rig.finish_voice(&idle, 3);
        rig.drain_events();

        rig.engine.handle(EngineCommand::StopAll);
        let mut ended: Vec<String> = rig
            .drain_events()
            .into_iter()
            .map(|msg| match msg {
                Message::SoundEnded { sound_id } => sound_id.as_str().to_string(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        ended.sort();
        assert_eq!(ended, vec!["sound-kick.wav", "sound-snare.wav"]);

        // Idempotent: nothing left to stop.
        rig.engine.handle(EngineCommand::StopAll);
        assert!(rig.drain_events().is_empty());
    }

    #[tokio::test]
    async fn effective_gain_is_clip_volume_times_master() {
        let mut rig = rig();
        let kick = clip_id("kick.wav");
        let snare = clip_id("snare.wav");

        rig.engine.handle(EngineCommand::Play(kick.clone()));
        rig.engine.handle(EngineCommand::Play(snare.clone()));
        rig.pump_load().await;
        rig.pump_load().await;

        rig.engine.handle(EngineCommand::SetVolume(kick.clone(), 0.5));
        assert_eq!(rig.voice_named("kick.wav").gain(), 0.5);
        assert_eq!(rig.voice_named("snare.wav").gain(), 1.0);

        rig.engine.handle(EngineCommand::SetMasterVolume(0.5));
        assert_eq!(rig.voice_named("kick.wav").gain(), 0.25);
        assert_eq!(rig.voice_named("snare.wav").gain(), 0.5);

        // Restoring master scales back up proportionally, same voices.
        rig.engine.handle(EngineCommand::SetMasterVolume(1.0));
        assert_eq!(rig.voice_named("kick.wav").gain(), 0.5);
        assert_eq!(rig.voice_named("snare.wav").gain(), 1.0);
        assert_eq!(rig.voice_count(), 2);
    }

    #[tokio::test]
    async fn new_voice_starts_at_its_effective_gain() {
        let mut rig = rig();
        let kick = clip_id("kick.wav");

        let mut settings = GlobalSettings::default();
        settings.master_volume = 0.5;
        settings.sounds.insert(
            kick.clone(),
            SoundSettings {
                volume: 0.5,
                color: String::new(),
            },
        );
        rig.engine.handle(EngineCommand::ApplySettings(settings));

        rig.engine.handle(EngineCommand::Play(kick.clone()));
        rig.pump_load().await;
        assert_eq!(rig.voice(0).gain(), 0.25);
    }

    #[tokio::test]
    async fn snapshot_retunes_running_voices() {
        let mut rig = rig();
        let kick = clip_id("kick.wav");

        rig.engine.handle(EngineCommand::Play(kick.clone()));
        rig.pump_load().await;
        assert_eq!(rig.voice(0).gain(), 1.0);

        let mut settings = GlobalSettings::default();
        settings.master_volume = 0.25;
        rig.engine.handle(EngineCommand::ApplySettings(settings));
        assert_eq!(rig.voice(0).gain(), 0.25);
    }

    #[tokio::test]
    async fn output_failure_keeps_clip_ready_without_events() {
        let mut rig = rig();
        rig.engine.backend.fail_start = true;
        let kick = clip_id("kick.wav");

        rig.engine.handle(EngineCommand::Play(kick.clone()));
        rig.pump_load().await;
        assert!(rig.drain_events().is_empty());
        assert!(matches!(
            rig.engine.clips.get(&kick),
            Some(ClipState::Ready(_))
        ));

        // Once the device recovers, the same clip plays without reloading.
        rig.engine.backend.fail_start = false;
        rig.engine.handle(EngineCommand::Play(kick.clone()));
        assert_eq!(
            rig.drain_events(),
            vec![Message::SoundStarted { sound_id: kick }]
        );
    }

    #[tokio::test]
    async fn malformed_clip_id_is_ignored() {
        let mut rig = rig();
        rig.engine
            .handle(EngineCommand::Play(ClipId::from("not-a-clip-id")));
        assert!(rig.engine.clips.is_empty());
        assert!(rig.drain_events().is_empty());
    }
}
