//! Session manager
//!
//! The presentation-side owner of everything: configuration, the session
//! registry, one renderer per surface, the clipboard history and the event
//! channel the reader threads report on. All methods are meant to be called
//! from the single presentation thread.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, ShellConfig};
use crate::core::launch::LaunchSpec;
use crate::core::registry::SessionRegistry;
use crate::core::session::{
    Session, SessionCommand, SessionEvent, SessionEventKind, SessionOptions, SurfaceId,
};
use crate::error::Result;
use crate::ui::clipboard::ClipboardHistory;
use crate::ui::renderer::{DisplayRegion, Renderer};

/// A host's request to start a terminal on a surface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenRequest {
    /// Named shell profile; `"Default"` picks the default one
    pub config_name: Option<String>,
    /// Command line; overrides the profile's command when non-empty
    pub command: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Merged over the profile environment
    pub env: BTreeMap<String, String>,
    pub title: Option<String>,
    pub tag: Option<String>,
}

impl OpenRequest {
    pub fn command<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn profile(name: impl Into<String>) -> Self {
        Self {
            config_name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Which session a command is aimed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Surface(SurfaceId),
    Tag(String),
}

pub struct SessionManager {
    config: Config,
    registry: SessionRegistry,
    renderers: HashMap<SurfaceId, Renderer>,
    clipboard: ClipboardHistory,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            config,
            registry: SessionRegistry::new(),
            renderers: HashMap::new(),
            clipboard: ClipboardHistory::default(),
            events_tx,
            events_rx,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn clipboard(&self) -> &ClipboardHistory {
        &self.clipboard
    }

    /// Start a session for `surface` with a `rows`×`cols` grid.
    ///
    /// Configuration problems fail before anything is spawned. A surface
    /// that already has a session gets the old one closed first.
    pub fn open(
        &mut self,
        surface: SurfaceId,
        request: OpenRequest,
        rows: u16,
        cols: u16,
    ) -> Result<Arc<Session>> {
        let profile = self.resolve_profile(&request)?;

        let command = if request.command.is_empty() {
            profile.cmd.to_args()
        } else {
            request.command
        };
        let mut env = profile.env.clone();
        env.extend(request.env);
        let spec = LaunchSpec::resolve(command, request.cwd, env, &self.config.unix_term)?;
        let title = request.title.unwrap_or_else(|| profile.name.clone());

        tracing::info!(
            surface,
            profile = %profile.name,
            cwd = %spec.cwd.display(),
            "opening session"
        );

        let options = SessionOptions {
            rows,
            cols,
            scrollback_limit: self.config.scrollback_limit(),
            close_grace: self.config.close_grace(),
        };
        let session = Session::open(
            surface,
            request.tag.clone(),
            title,
            spec,
            options,
            self.events_tx.clone(),
        )?;

        if let Some(previous) = self
            .registry
            .register(surface, request.tag.as_deref(), Arc::clone(&session))
        {
            tracing::debug!(surface, "replacing session on reused surface");
            previous.close();
        }
        self.renderers.insert(surface, Renderer::new());
        Ok(session)
    }

    fn resolve_profile(&self, request: &OpenRequest) -> Result<ShellConfig> {
        match &request.config_name {
            Some(name) => self.config.profile_by_name(name),
            None if !request.command.is_empty() => {
                Ok(ShellConfig::ad_hoc(request.command.clone()))
            }
            None => Ok(self.config.default_profile()),
        }
    }

    /// Look up a live session
    pub fn find(&self, target: &Target) -> Result<Arc<Session>> {
        match target {
            Target::Surface(surface) => self.registry.get(*surface),
            Target::Tag(tag) => self.registry.get_by_tag(tag),
        }
    }

    /// Run a command against a session. `Close` also forgets the session;
    /// `Copy` records the copied text in the clipboard history.
    pub fn dispatch(&mut self, target: &Target, command: SessionCommand) -> Result<Option<String>> {
        let session = self.find(target)?;
        match command {
            SessionCommand::Close => {
                self.close(session.surface());
                Ok(None)
            }
            SessionCommand::Copy => {
                let copied = session.apply(SessionCommand::Copy)?;
                if let Some(text) = &copied {
                    self.clipboard.push(text.clone());
                }
                Ok(copied)
            }
            command => session.apply(command),
        }
    }

    /// Paste history entry `index` (newest first) and move it to the top
    pub fn paste_from_history(&mut self, target: &Target, index: usize) -> Result<bool> {
        let session = self.find(target)?;
        match self.clipboard.select(index) {
            Some(text) => {
                session.paste(text, false);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close and forget the session on `surface`, if any
    pub fn close(&mut self, surface: SurfaceId) {
        self.renderers.remove(&surface);
        if let Some(session) = self.registry.unregister(surface) {
            session.close();
        }
    }

    /// The host destroyed a surface; its session goes with it
    pub fn surface_destroyed(&mut self, surface: SurfaceId) {
        tracing::debug!(surface, "surface destroyed");
        self.close(surface);
    }

    /// Wait up to `timeout` for reader events, then drain whatever else is
    /// queued. Events from sessions that have since been closed or replaced
    /// on their surface are dropped.
    pub fn poll_events(&mut self, timeout: Duration) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => events.push(event),
            Err(RecvTimeoutError::Timeout) => return events,
            // The manager holds a sender, so this cannot happen
            Err(RecvTimeoutError::Disconnected) => return events,
        }
        events.extend(self.events_rx.try_iter());

        events.retain(|event| {
            let live = self
                .registry
                .find_by_surface(event.surface)
                .map_or(false, |session| session.serial() == event.session);
            if live {
                if let SessionEventKind::Exited(code) = event.kind {
                    tracing::info!(surface = event.surface, exit_code = code, "process terminated");
                }
            }
            live
        });
        events
    }

    /// Sync the session on `surface` into `region`
    pub fn render(&mut self, surface: SurfaceId, region: &mut dyn DisplayRegion) -> Result<()> {
        let session = self.registry.get(surface)?;
        session.take_render_request();
        let renderer = self.renderers.entry(surface).or_default();
        let frame = session.with_terminal(|terminal| renderer.prepare(terminal));
        renderer.apply(frame, region);
        Ok(())
    }

    /// Close every session
    pub fn close_all(&mut self) {
        self.renderers.clear();
        for session in self.registry.drain() {
            session.close();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_unknown_profile_is_configuration_error() {
        let mut manager = SessionManager::new(Config::default());
        let result = manager.open(1, OpenRequest::profile("Nope"), 24, 80);
        assert!(matches!(result, Err(Error::Configuration(_))));
        assert!(manager.registry().is_empty());
    }

    #[test]
    fn test_missing_cwd_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = SessionManager::new(Config::default());
        let request = OpenRequest {
            cwd: Some(dir.path().join("missing")),
            ..OpenRequest::command(["/bin/echo", "hi"])
        };
        assert!(matches!(
            manager.open(1, request, 24, 80),
            Err(Error::Configuration(_))
        ));
        assert!(manager.registry().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_disallowed_term_from_request_env() {
        let mut manager = SessionManager::new(Config::default());
        let mut request = OpenRequest::command(["/bin/echo"]);
        request.env.insert("TERM".into(), "dumb".into());
        assert!(matches!(
            manager.open(1, request, 24, 80),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_dispatch_to_unknown_target() {
        let mut manager = SessionManager::new(Config::default());
        let result = manager.dispatch(&Target::Tag("ghost".into()), SessionCommand::Copy);
        assert!(matches!(result, Err(Error::RegistryMiss(_))));
        let result = manager.render(3, &mut crate::ui::TextBuffer::default());
        assert!(matches!(result, Err(Error::RegistryMiss(_))));
    }

    #[test]
    fn test_resolve_profile_ad_hoc_and_default() {
        let manager = SessionManager::new(Config::default());
        let ad_hoc = manager
            .resolve_profile(&OpenRequest::command(["htop"]))
            .unwrap();
        assert_eq!(ad_hoc.name, "bufterm");
        let default = manager.resolve_profile(&OpenRequest::default()).unwrap();
        assert_eq!(default, ShellConfig::builtin_default());
    }
}
