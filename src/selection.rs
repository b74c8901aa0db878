//! Detected-items list
//!
//! Host-side list of the latest prediction list. Entries read
//! `"{class} ({NN}%)"`; picking one fires the selection callback with the
//! class label.

use crossbeam_channel::Receiver;
use tracing::debug;

use crate::detection::Prediction;

/// Fired when the user picks a detected class
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionEvent {
    pub class_label: String,
    pub confidence: f32,
}

impl From<&Prediction> for SelectionEvent {
    fn from(prediction: &Prediction) -> Self {
        Self {
            class_label: prediction.class_label.clone(),
            confidence: prediction.confidence,
        }
    }
}

/// Mirrors the detection client's latest list for the host UI
pub struct DetectedList {
    items: Vec<Prediction>,
    updates: Receiver<Vec<Prediction>>,
    on_select: Box<dyn FnMut(&SelectionEvent) + Send>,
}

impl DetectedList {
    pub fn new(updates: Receiver<Vec<Prediction>>, on_select: impl FnMut(&SelectionEvent) + Send + 'static) -> Self {
        Self {
            items: Vec::new(),
            updates,
            on_select: Box::new(on_select),
        }
    }

    /// Drain pending updates, keeping the newest. Returns whether the list changed.
    pub fn poll(&mut self) -> bool {
        match self.updates.try_iter().last() {
            Some(latest) => {
                debug!("Detected list updated: {} items", latest.len());
                self.items = latest;
                true
            }
            None => false,
        }
    }

    pub fn items(&self) -> &[Prediction] {
        &self.items
    }

    /// Display strings, one per prediction
    pub fn entries(&self) -> Vec<String> {
        self.items.iter().map(Prediction::label).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pick the entry at `index`
    pub fn pick(&mut self, index: usize) -> Option<SelectionEvent> {
        let event = SelectionEvent::from(self.items.get(index)?);
        (self.on_select)(&event);
        Some(event)
    }

    /// Pick the first entry with `class_label`
    pub fn pick_label(&mut self, class_label: &str) -> Option<SelectionEvent> {
        let index = self.items.iter().position(|p| p.class_label == class_label)?;
        self.pick(index)
    }
}
