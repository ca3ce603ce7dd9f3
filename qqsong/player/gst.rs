use crate::error::{App, PlayError};
use crate::player::media::{EventSink, Media, MediaEvent, MediaFactory};
use async_trait::async_trait;
use futures_util::StreamExt;
use glib::object::ObjectExt;
use gstreamer::prelude::{ElementExt, ElementExtManual, GstBinExtManual, PadExt};
use gstreamer::{ClockTime, MessageView, Pipeline, State};
use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PREROLL_TIMEOUT: u64 = 10;

pub struct GstFactory;

impl GstFactory {
    pub fn new() -> Result<Self, App> {
        gstreamer::init().map_err(|e| App::Media(e.to_string()))?;
        info!("GStreamer initialized.");
        Ok(Self)
    }
}

impl MediaFactory for GstFactory {
    fn create(&self, url: &str, events: EventSink) -> Result<Arc<dyn Media>, PlayError> {
        let pipeline = Pipeline::new();
        let volume = build_pipeline(&pipeline, url)?;
        Ok(Arc::new(GstMedia {
            pipeline,
            volume,
            events,
            stop: CancellationToken::new(),
            released: AtomicBool::new(false),
        }))
    }
}

/// Builds the source half of the pipeline and returns its volume element,
/// which the decoded pad gets linked through.
fn build_pipeline(pipeline: &Pipeline, url: &str) -> Result<gstreamer::Element, PlayError> {
    let source = gstreamer::ElementFactory::make("souphttpsrc")
        .build()
        .map_err(|_| PlayError::Playback("Failed to create souphttpsrc element".to_string()))?;
    source.set_property("location", url);

    let decodebin = gstreamer::ElementFactory::make("decodebin")
        .build()
        .map_err(|_| PlayError::Playback("Failed to create decodebin element".to_string()))?;

    let volume = gstreamer::ElementFactory::make("volume")
        .build()
        .map_err(|_| PlayError::Playback("Failed to create volume element".to_string()))?;

    pipeline
        .add_many([&source, &decodebin, &volume])
        .map_err(|_| PlayError::Playback("Failed to add elements to pipeline".to_string()))?;
    source
        .link(&decodebin)
        .map_err(|_| PlayError::Playback("Failed to link source to decodebin".to_string()))?;

    let pipeline_weak = pipeline.downgrade();
    let volume_weak = volume.downgrade();
    decodebin.connect_pad_added(move |_, src_pad| {
        let (Some(pipeline), Some(volume)) = (pipeline_weak.upgrade(), volume_weak.upgrade())
        else {
            error!("Failed to upgrade pipeline reference");
            return;
        };
        match link_output(&pipeline, &volume, src_pad) {
            Ok(()) => info!("Pipeline elements linked successfully"),
            Err(e) => error!("Failed to link decoded pad: {e}"),
        }
    });
    Ok(volume)
}

fn link_output(
    pipeline: &Pipeline,
    volume: &gstreamer::Element,
    src_pad: &gstreamer::Pad,
) -> Result<(), String> {
    let make = |name: &str| {
        gstreamer::ElementFactory::make(name)
            .build()
            .map_err(|_| format!("Failed to create {name} element"))
    };
    let audioconvert = make("audioconvert")?;
    let audioresample = make("audioresample")?;
    let autoaudiosink = make("autoaudiosink")?;

    pipeline
        .add_many([&audioconvert, &audioresample, &autoaudiosink])
        .map_err(|e| e.to_string())?;
    for element in [&audioconvert, &audioresample, &autoaudiosink] {
        element.sync_state_with_parent().map_err(|e| e.to_string())?;
    }

    let audio_pad = audioconvert
        .static_pad("sink")
        .ok_or_else(|| "Failed to get static pad".to_string())?;
    src_pad.link(&audio_pad).map_err(|e| e.to_string())?;
    audioconvert.link(volume).map_err(|e| e.to_string())?;
    volume.link(&audioresample).map_err(|e| e.to_string())?;
    audioresample.link(&autoaudiosink).map_err(|e| e.to_string())?;
    Ok(())
}

pub struct GstMedia {
    pipeline: Pipeline,
    volume: gstreamer::Element,
    events: EventSink,
    stop: CancellationToken,
    released: AtomicBool,
}

impl GstMedia {
    fn set_state(&self, state: State) -> Result<(), PlayError> {
        self.pipeline
            .set_state(state)
            .map(|_| ())
            .map_err(|_| PlayError::Playback(format!("Failed to set pipeline to {state:?}")))
    }

    fn listen_to_bus(&self) -> Result<(), PlayError> {
        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| PlayError::Playback("Failed to get GStreamer bus".to_string()))?;
        let mut messages = bus.stream();
        let events = self.events.clone();
        let stop = self.stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    message = messages.next() => {
                        let Some(message) = message else { break };
                        match message.view() {
                            MessageView::Eos(_) => {
                                info!("EOS message received for session {}", events.token());
                                events.send(MediaEvent::Ended);
                                break;
                            }
                            MessageView::Error(err) => {
                                error!("Error from GStreamer pipeline: {}", err.error());
                                events.send(MediaEvent::Failed(err.error().to_string()));
                                break;
                            }
                            _ => (),
                        }
                    }
                }
            }
        });
        Ok(())
    }
}

#[async_trait]
impl Media for GstMedia {
    async fn load(&self) -> Result<Option<Duration>, PlayError> {
        self.set_state(State::Paused)?;
        let pipeline = self.pipeline.clone();
        let prerolled = tokio::task::spawn_blocking(move || {
            let (result, _, _) = pipeline.state(ClockTime::from_seconds(PREROLL_TIMEOUT));
            result.is_ok()
        })
        .await
        .map_err(|e| PlayError::Playback(e.to_string()))?;
        if !prerolled {
            return Err(PlayError::Playback("Failed to preroll stream".to_string()));
        }
        Ok(self
            .pipeline
            .query_duration::<ClockTime>()
            .map(|duration| Duration::from_nanos(duration.nseconds())))
    }

    async fn play(&self) -> Result<(), PlayError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(PlayError::Playback("媒体已释放".to_string()));
        }
        self.listen_to_bus()?;
        self.set_state(State::Playing)
    }

    fn pause(&self) -> Result<(), PlayError> {
        self.set_state(State::Paused)
    }

    fn resume(&self) -> Result<(), PlayError> {
        self.set_state(State::Playing)
    }

    fn position(&self) -> Option<Duration> {
        self.pipeline
            .query_position::<ClockTime>()
            .map(|position| Duration::from_nanos(position.nseconds()))
    }

    fn set_volume(&self, volume: f64) -> Result<(), PlayError> {
        self.volume.set_property("volume", volume);
        Ok(())
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop.cancel();
        if let Err(e) = self.set_state(State::Null) {
            error!("{e}");
        }
    }
}
