use crate::error::Result;
use crate::settings::ExportSettings;
use crate::types::ClipHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Which input a newly picked clip fills.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ClipSlot {
    First,
    Second,
    Overlay,
}

impl ClipSlot {
    pub const ALL: [ClipSlot; 3] = [ClipSlot::First, ClipSlot::Second, ClipSlot::Overlay];
}

impl fmt::Display for ClipSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipSlot::First => f.write_str("first"),
            ClipSlot::Second => f.write_str("second"),
            ClipSlot::Overlay => f.write_str("overlay"),
        }
    }
}

/// Caller-side selection state: the three picked clips plus export settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub first: Option<ClipHandle>,
    pub second: Option<ClipHandle>,
    pub overlay: Option<ClipHandle>,
    #[serde(default)]
    pub settings: ExportSettings,
}

impl Session {
    pub fn new(settings: ExportSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Put `clip` into `slot`, returning whatever was there before.
    pub fn assign(&mut self, slot: ClipSlot, clip: ClipHandle) -> Option<ClipHandle> {
        self.slot_mut(slot).replace(clip)
    }

    pub fn clear(&mut self, slot: ClipSlot) -> Option<ClipHandle> {
        self.slot_mut(slot).take()
    }

    pub fn get(&self, slot: ClipSlot) -> Option<&ClipHandle> {
        match slot {
            ClipSlot::First => self.first.as_ref(),
            ClipSlot::Second => self.second.as_ref(),
            ClipSlot::Overlay => self.overlay.as_ref(),
        }
    }

    fn slot_mut(&mut self, slot: ClipSlot) -> &mut Option<ClipHandle> {
        match slot {
            ClipSlot::First => &mut self.first,
            ClipSlot::Second => &mut self.second,
            ClipSlot::Overlay => &mut self.overlay,
        }
    }

    /// All three clips, once every slot is filled.
    pub fn ready(&self) -> Option<(&ClipHandle, &ClipHandle, &ClipHandle)> {
        Some((
            self.first.as_ref()?,
            self.second.as_ref()?,
            self.overlay.as_ref()?,
        ))
    }

    pub fn missing_slots(&self) -> Vec<ClipSlot> {
        ClipSlot::ALL
            .into_iter()
            .filter(|slot| self.get(*slot).is_none())
            .collect()
    }

    /// Save as pretty JSON. Appends `.pipcut` if not present.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = ensure_extension(path.as_ref());
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let session: Session = serde_json::from_str(&data)?;
        Ok(session)
    }
}

fn ensure_extension(path: &Path) -> std::path::PathBuf {
    if path.extension().and_then(|e| e.to_str()) == Some("pipcut") {
        path.to_path_buf()
    } else {
        let mut p = path.to_path_buf();
        let mut name = p.file_name().unwrap_or_default().to_os_string();
        name.push(".pipcut");
        p.set_file_name(name);
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeUs;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn clip(name: &str) -> ClipHandle {
        ClipHandle {
            id: Uuid::new_v4(),
            name: name.to_string(),
            path: PathBuf::from(format!("/media/{name}")),
            duration: TimeUs(1_000_000),
            tracks: vec![],
        }
    }

    #[test]
    fn ready_only_when_all_slots_filled() {
        let mut session = Session::default();
        assert!(session.ready().is_none());
        assert_eq!(session.missing_slots().len(), 3);

        session.assign(ClipSlot::First, clip("a.mp4"));
        session.assign(ClipSlot::Overlay, clip("c.mp4"));
        assert!(session.ready().is_none());
        assert_eq!(session.missing_slots(), vec![ClipSlot::Second]);

        session.assign(ClipSlot::Second, clip("b.mp4"));
        let (a, b, c) = session.ready().unwrap();
        assert_eq!(a.name, "a.mp4");
        assert_eq!(b.name, "b.mp4");
        assert_eq!(c.name, "c.mp4");
    }

    #[test]
    fn assign_replaces_previous_clip() {
        let mut session = Session::default();
        assert!(session.assign(ClipSlot::First, clip("a.mp4")).is_none());
        let previous = session.assign(ClipSlot::First, clip("z.mp4")).unwrap();
        assert_eq!(previous.name, "a.mp4");
        assert_eq!(session.get(ClipSlot::First).unwrap().name, "z.mp4");
        assert!(session.clear(ClipSlot::First).is_some());
        assert!(session.get(ClipSlot::First).is_none());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.pipcut");

        let mut session = Session::new(ExportSettings::default());
        session.assign(ClipSlot::First, clip("a.mp4"));
        session.save_to_file(&path).unwrap();

        let loaded = Session::load_from_file(&path).unwrap();
        assert_eq!(session, loaded);
    }

    #[test]
    fn extension_appended_if_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("no_ext");

        let session = Session::default();
        session.save_to_file(&path).unwrap();

        let expected_path = dir.path().join("no_ext.pipcut");
        assert!(expected_path.exists());
        assert_eq!(Session::load_from_file(&expected_path).unwrap(), session);
    }

    #[test]
    fn slot_display() {
        assert_eq!(ClipSlot::First.to_string(), "first");
        assert_eq!(ClipSlot::Overlay.to_string(), "overlay");
    }
}
