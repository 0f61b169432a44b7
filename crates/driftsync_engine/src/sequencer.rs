//! Safe execution order for filesystem actions.
//!
//! Buckets, in order:
//!
//! 1. removals of files and symlinks
//! 2. folder creations, moves and updates, shortest path first
//! 3. creations of files and symlinks
//! 4. moves of files and symlinks
//! 5. in-place updates of files and symlinks
//! 6. folder removals, deepest path first
//!
//! A creating action whose path equals a folder removal's path is moved
//! directly behind that removal, so the old folder is gone before the
//! new entry takes its place.
//!
//! In-place updates free or occupy no path, so they run after every
//! creation and move rather than first.

use crate::actions::{Effect, FileSystemAction};
use driftsync_protocol::FileType;
use std::cmp::{Ordering, Reverse};
use std::collections::{HashMap, HashSet};

/// Orders actions so no step destroys or blocks a later one.
pub struct ActionSequencer;

impl ActionSequencer {
    /// Returns `actions` in execution order.
    pub fn sequence(actions: Vec<FileSystemAction>) -> Vec<FileSystemAction> {
        let mut actions = actions;
        actions.sort_by(compare);

        let removed_folders: HashSet<String> = actions
            .iter()
            .filter(|a| is_folder_removal(a))
            .map(|a| a.target.path.clone())
            .collect();

        let mut stash: HashMap<String, Vec<FileSystemAction>> = HashMap::new();
        let mut ordered = Vec::with_capacity(actions.len());
        for action in actions {
            if action.target.effect != Effect::Remove && removed_folders.contains(&action.target.path) {
                stash
                    .entry(action.target.path.clone())
                    .or_default()
                    .push(action);
            } else {
                ordered.push(action);
            }
        }

        let mut sequenced = Vec::with_capacity(ordered.len());
        for action in ordered {
            let relocated = is_folder_removal(&action)
                .then(|| stash.remove(&action.target.path))
                .flatten();
            sequenced.push(action);
            sequenced.extend(relocated.into_iter().flatten());
        }
        sequenced
    }
}

fn is_folder_removal(action: &FileSystemAction) -> bool {
    action.target.effect == Effect::Remove && action.target.file_type == FileType::Folder
}

fn bucket(action: &FileSystemAction) -> u8 {
    let folder = action.target.file_type == FileType::Folder;
    match (action.target.effect, folder) {
        (Effect::Remove, false) => 0,
        (_, true) if action.target.effect != Effect::Remove => 1,
        (Effect::Create, _) => 2,
        (Effect::Move, _) => 3,
        (Effect::Update, _) => 4,
        (Effect::Remove, true) => 5,
    }
}

fn compare(a: &FileSystemAction, b: &FileSystemAction) -> Ordering {
    let (pa, pb) = (&a.target.path, &b.target.path);
    bucket(a).cmp(&bucket(b)).then_with(|| match bucket(a) {
        1 => (pa.len(), pa).cmp(&(pb.len(), pb)),
        5 => (Reverse(pa.len()), Reverse(pa)).cmp(&(Reverse(pb.len()), Reverse(pb))),
        _ => pa.cmp(pb),
    })
    .then_with(|| a.to_string().cmp(&b.to_string()))
}
