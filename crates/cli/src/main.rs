//! `wceditor` — a demo driver that replays a textual edit script against a
//! real working copy on disk, using the filesystem-backed admin store.
//!
//! The script format is line-oriented, one directive per line, `#`
//! comments allowed. It exists to exercise the dispatcher end-to-end; it
//! is not a wire protocol.

use std::rc::Rc;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use wceditor_admin::conflict_resolver::PostponingResolver;
use wceditor_admin::externals::NullExternalsSink;
use wceditor_admin::fetch::UnavailableFetch;
use wceditor_admin::fs_store::FsAdminStore;
use wceditor_admin::notify::{NotifyEvent, Notifier};
use wceditor_admin::pristine::FsPristineStore;
use wceditor_admin::translate::IdentityTranslation;
use wceditor_core::config::EditorConfig;
use wceditor_core::context::Collaborators;
use wceditor_core::dispatcher::Editor;

mod script;

/// Replay a textual edit script against a working copy.
#[derive(Parser, Debug)]
#[command(name = "wceditor", version)]
struct Opts {
    /// Root of the working copy to write into; created if absent.
    #[arg(long)]
    wc_root: Utf8PathBuf,

    /// Path to the edit script to replay.
    script: Utf8PathBuf,

    /// Revision the edit brings the working copy to.
    #[arg(long, default_value_t = 1)]
    target_revision: u64,

    /// Repository root URL the working copy is checked out from.
    #[arg(long, default_value = "file:///repo")]
    repos_root: String,

    /// Switch the anchor to a different URL under the same repository.
    #[arg(long)]
    switch_url: Option<String>,
}

/// Prints every notification to stderr as it arrives; the dispatcher
/// treats this as best-effort, so a panicking notifier would be a bug in
/// this driver, not in the dispatcher.
struct PrintingNotifier;

impl Notifier for PrintingNotifier {
    fn notify(&self, event: NotifyEvent) {
        use owo_colors::OwoColorize;
        match event {
            NotifyEvent::UpdateAdd { path } => eprintln!("{} {path}", "A".green()),
            NotifyEvent::UpdateUpdate { path, content_state } => {
                eprintln!("{} {path} ({content_state:?})", "U".blue())
            }
            NotifyEvent::UpdateDelete { path } => eprintln!("{} {path}", "D".red()),
            NotifyEvent::Exists { path } => eprintln!("{} {path}", "E".yellow()),
            NotifyEvent::Skip { path } => eprintln!("{} {path}", "S".yellow()),
            NotifyEvent::UpdateObstruction { path } => eprintln!("{} {path}", "O".red()),
            NotifyEvent::TreeConflict { path } => eprintln!("{} {path}", "C".red().bold()),
            NotifyEvent::MissingRemoved { path } => eprintln!("{} {path}", "!".red()),
        }
    }
}

fn run() -> anyhow::Result<()> {
    let opts = Opts::parse();
    wceditor_utils::initialize_tracing();

    std::fs::create_dir_all(&opts.wc_root)
        .with_context(|| format!("creating working copy root '{}'", opts.wc_root))?;

    let admin_store = Rc::new(FsAdminStore::new(opts.wc_root.clone()));
    let admin: Rc<dyn wceditor_admin::entries::AdminStore> = admin_store.clone();
    let log: Rc<dyn wceditor_admin::log::LogEngine> = admin_store.clone();
    let pristine = Rc::new(FsPristineStore {
        wc_root: opts.wc_root.clone(),
    });

    let collaborators = Collaborators {
        admin,
        log,
        pristine,
        notifier: Rc::new(PrintingNotifier),
        fetch: Rc::new(UnavailableFetch),
        resolver: Rc::new(PostponingResolver),
        externals: Rc::new(NullExternalsSink),
        translation: Rc::new(IdentityTranslation),
    };

    let config = EditorConfig {
        switch_url: opts.switch_url,
        ..Default::default()
    };

    let editor = Editor::new(
        opts.wc_root.clone(),
        String::new(),
        config,
        opts.repos_root,
        uuid::Uuid::new_v4(),
        collaborators,
    )?;
    editor.set_target_revision(opts.target_revision);

    let text = std::fs::read_to_string(&opts.script)
        .with_context(|| format!("reading edit script '{}'", opts.script))?;
    let directives = script::parse(&text)?;
    script::replay(&editor, &directives)?;

    Ok(())
}

fn main() {
    wceditor_utils::run_main(run)
}
