use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Toast severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
  Info,
  Warn,
  Error,
}

/// Application events
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
  /// Transient, non-fatal notice for the user
  Toast { kind: ToastKind, message: String },
  /// A new offline worker took control; the page should reload once
  ReloadRequested,
}

/// Cloneable producer side of the event channel. Sends never fail the caller.
#[derive(Debug, Clone)]
pub struct EventSender {
  tx: mpsc::UnboundedSender<AppEvent>,
}

impl EventSender {
  pub fn send(&self, event: AppEvent) {
    if self.tx.send(event).is_err() {
      debug!("Event dropped: receiver closed");
    }
  }

  pub fn toast(&self, kind: ToastKind, message: impl Into<String>) {
    let message = message.into();
    if kind != ToastKind::Info {
      warn!("{}", message);
    }
    self.send(AppEvent::Toast { kind, message });
  }
}

/// Event handler owning the receiving side of the application event channel
pub struct EventHandler {
  tx: mpsc::UnboundedSender<AppEvent>,
  rx: mpsc::UnboundedReceiver<AppEvent>,
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  pub fn sender(&self) -> EventSender {
    EventSender {
      tx: self.tx.clone(),
    }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<AppEvent> {
    self.rx.recv().await
  }

  /// Everything queued so far, without waiting.
  pub fn drain(&mut self) -> Vec<AppEvent> {
    let mut events = Vec::new();
    while let Ok(event) = self.rx.try_recv() {
      events.push(event);
    }
    events
  }
}
