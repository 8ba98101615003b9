//! Content hashing for incremental diffing.
//!
//! The digest covers the fields that, if unchanged, make a story a
//! no-op for diffing: title, description, points, priority, status,
//! subtasks, links, and comment content. Remote ids and comment
//! timestamps are excluded: ids are identity rather than content, and
//! trackers assign their own timestamps when a comment is posted, so
//! either would defeat the skip on re-diff after a successful sync.
//!
//! Fields are fed to the hasher length-prefixed so that adjacent
//! values cannot collide by concatenation (`"ab" + "c"` vs
//! `"a" + "bc"`). Subtasks are hashed in sequence-number order and
//! links in field order, so hashes are stable under reordering of the
//! subtask array but sensitive to authored link order.

use crate::entity::Story;
use sha2::{Digest, Sha256};

/// Computes the hex-encoded content digest of a story.
pub fn story_content_hash(story: &Story) -> String {
    let mut hasher = Sha256::new();

    feed(&mut hasher, story.title.as_bytes());
    feed(&mut hasher, story.description.as_bytes());
    feed_opt_u32(&mut hasher, story.story_points);
    feed(&mut hasher, story.priority.as_str().as_bytes());
    feed(&mut hasher, story.status.as_str().as_bytes());

    let mut subtasks: Vec<_> = story.subtasks.iter().collect();
    subtasks.sort_by_key(|s| s.sequence_number);
    feed_len(&mut hasher, subtasks.len());
    for subtask in subtasks {
        feed(&mut hasher, &subtask.sequence_number.to_be_bytes());
        feed(&mut hasher, subtask.title.as_bytes());
        feed(&mut hasher, subtask.description.as_bytes());
        feed_opt_u32(&mut hasher, subtask.story_points);
        feed(&mut hasher, subtask.status.as_str().as_bytes());
    }

    feed_len(&mut hasher, story.links.len());
    for link in &story.links {
        feed(&mut hasher, link.target_key.as_bytes());
        feed(&mut hasher, link.link_type.as_str().as_bytes());
    }

    feed_len(&mut hasher, story.comments.len());
    for comment in &story.comments {
        feed(&mut hasher, comment.author.as_bytes());
        feed(&mut hasher, comment.body.as_bytes());
    }

    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

fn feed_len(hasher: &mut Sha256, len: usize) {
    hasher.update((len as u64).to_be_bytes());
}

fn feed_opt_u32(hasher: &mut Sha256, value: Option<u32>) {
    match value {
        Some(v) => {
            hasher.update([1u8]);
            hasher.update(v.to_be_bytes());
        }
        None => hasher.update([0u8]),
    }
}
