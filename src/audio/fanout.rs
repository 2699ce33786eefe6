use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// One mono block of device-rate samples, produced per callback tick.
pub type Frame = Vec<f32>;

/// Producer half of a bounded frame channel.
///
/// `post` never blocks: a full channel counts a drop instead of stalling the
/// audio thread, and a disconnected consumer is treated as gone for good.
#[derive(Clone)]
pub struct FrameSink {
    sender: Sender<Frame>,
    delivered: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
}

impl FrameSink {
    /// Create a sink and the consumer end it feeds.
    pub fn bounded(capacity: usize) -> (Self, Receiver<Frame>) {
        let (sender, receiver) = bounded(capacity.max(1));
        let sink = Self {
            sender,
            delivered: Arc::new(AtomicUsize::new(0)),
            dropped: Arc::new(AtomicUsize::new(0)),
        };
        (sink, receiver)
    }

    pub(crate) fn post(&self, frame: Frame) {
        match self.sender.try_send(frame) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Frames handed to the consumer.
    pub fn delivered_frames(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames discarded because the consumer fell behind.
    pub fn dropped_frames(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Counter handle that outlives the sink once it moves into the callback.
    pub fn drop_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.dropped)
    }
}

/// Fan-out point between the realtime callback and its consumers. Every sink
/// sees every frame, in production order.
#[derive(Clone)]
pub(super) struct FrameFanout {
    sinks: Vec<FrameSink>,
}

impl FrameFanout {
    pub(super) fn new(sinks: Vec<FrameSink>) -> Self {
        Self { sinks }
    }

    pub(super) fn post(&self, frame: Frame) {
        let Some((last, rest)) = self.sinks.split_last() else {
            return;
        };
        for sink in rest {
            sink.post(frame.clone());
        }
        last.post(frame);
    }
}

/// Downmix interleaved multi-channel input to mono while applying the format
/// converter, so every consumer sees a single channel regardless of the
/// microphone layout.
pub(super) fn fold_to_mono<T, F>(buf: &mut Vec<f32>, data: &[T], channels: usize, mut convert: F)
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    // Average each interleaved group into one sample.
    let mut acc = 0.0f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}
