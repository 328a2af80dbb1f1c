use eframe::egui;
use std::collections::VecDeque;

use crate::canvas::PixelBuffer;

/// Number of undo steps kept.  Older snapshots are dropped first.
pub const UNDO_CAPACITY: usize = 20;

// ============================================================================
// SNAPSHOT ENTRY
// ============================================================================

/// One image state on the undo or redo stack.
///
/// `PixelBuffer` shares its samples, so recording a snapshot never copies
/// pixel data.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub description: String,
    pub image: PixelBuffer,
}

// ============================================================================
// HISTORY MANAGER - bounded undo/redo stacks of whole-image snapshots
// ============================================================================

pub struct HistoryManager {
    undo_stack: VecDeque<Snapshot>,
    redo_stack: VecDeque<Snapshot>,
    capacity: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(UNDO_CAPACITY)
    }
}

impl HistoryManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            undo_stack: VecDeque::with_capacity(capacity),
            redo_stack: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Push the state that existed *before* an edit.  Invalidates redo.
    pub fn record(&mut self, description: impl Into<String>, before: PixelBuffer) {
        self.redo_stack.clear();
        self.undo_stack.push_back(Snapshot {
            description: description.into(),
            image: before,
        });
        self.prune();
    }

    /// Pop the most recent undo snapshot, parking `current` on the redo stack
    /// under the same description.  `None` (and nothing moved) when empty.
    pub fn step_back(&mut self, current: PixelBuffer) -> Option<PixelBuffer> {
        let snap = self.undo_stack.pop_back()?;
        self.redo_stack.push_back(Snapshot {
            description: snap.description.clone(),
            image: current,
        });
        Some(snap.image)
    }

    /// Mirror of [`step_back`](Self::step_back).
    pub fn step_forward(&mut self, current: PixelBuffer) -> Option<PixelBuffer> {
        let snap = self.redo_stack.pop_back()?;
        self.undo_stack.push_back(Snapshot {
            description: snap.description.clone(),
            image: current,
        });
        self.prune();
        Some(snap.image)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.back().map(|s| s.description.as_str())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.back().map(|s| s.description.as_str())
    }

    /// Undo descriptions, most recent first.
    pub fn undo_history(&self) -> Vec<&str> {
        self.undo_stack.iter().rev().map(|s| s.description.as_str()).collect()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Upper bound on bytes held by both stacks.  Snapshots that share
    /// storage are counted once per entry.
    pub fn memory_usage(&self) -> usize {
        self.undo_stack
            .iter()
            .chain(self.redo_stack.iter())
            .map(|s| s.image.memory_bytes())
            .sum()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.capacity {
            self.undo_stack.pop_front();
        }
    }
}

// ============================================================================
// HISTORY PANEL - read-only listing for the side panel
// ============================================================================

#[derive(Default)]
pub struct HistoryPanel {
    show_memory_info: bool,
}

impl HistoryPanel {
    pub fn show(&mut self, ui: &mut egui::Ui, history: &HistoryManager) {
        ui.horizontal(|ui| {
            ui.label(format!("Undo: {} | Redo: {}", history.undo_count(), history.redo_count()));
            if ui.small_button("ℹ").on_hover_text("Show memory info").clicked() {
                self.show_memory_info = !self.show_memory_info;
            }
        });

        if self.show_memory_info {
            let mem_mb = history.memory_usage() as f64 / (1024.0 * 1024.0);
            ui.label(format!("Memory: {:.2} MB", mem_mb));
        }

        egui::ScrollArea::vertical()
            .max_height(150.0)
            .show(ui, |ui| {
                let items = history.undo_history();
                if items.is_empty() {
                    ui.weak("No history yet");
                } else {
                    for (i, desc) in items.iter().enumerate() {
                        if i == 0 {
                            ui.label(egui::RichText::new(format!("▶ {}", desc)).strong());
                        } else {
                            ui.weak(format!("  {}", desc));
                        }
                    }
                }
            });
    }
}
