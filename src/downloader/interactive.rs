//! Interactive candidate selection and folder completion.

use crate::types::{Track, TrackRef};
use crate::utils::{greatest_common_remote_dir, remote_dir_name};

use super::BatchDownloader;

/// Outcome of choosing among candidate groups
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Selection {
    /// Download these tracks of the group at `position`
    Accept {
        /// Position in the candidate list
        position: usize,
        /// The selected tracks (a subset after `d:`)
        refs: Vec<TrackRef>,
        /// Whether the folder may still be completed after downloading
        retrieve_folder: bool,
    },
    /// Give up on this item
    Skip,
    /// Give up on this item and stop the run
    Quit,
}

/// Parse a 1-based selection like `1,3-5,-2,7-` into 0-based indices
///
/// An open start means 1 and an open end means `count`. Indices keep the order
/// they were given in and appear once.
pub(crate) fn parse_ranges(ranges: &str, count: usize) -> Result<Vec<usize>, String> {
    let invalid = || format!("Invalid range: {}", ranges);
    let parse = |s: &str, default: usize| -> Result<usize, String> {
        let s = s.trim();
        if s.is_empty() {
            Ok(default)
        } else {
            s.parse::<usize>().map_err(|_| invalid())
        }
    };

    let mut indices = Vec::new();
    for part in ranges.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(invalid());
        }

        let (start, end) = match part.split_once('-') {
            Some((start, end)) => (parse(start, 1)?, parse(end, count)?),
            None => {
                let n = parse(part, 0)?;
                (n, n)
            }
        };

        if start == 0 || end > count || start > end {
            return Err(invalid());
        }
        for i in start - 1..end {
            if !indices.contains(&i) {
                indices.push(i);
            }
        }
    }

    if indices.is_empty() {
        return Err(invalid());
    }
    Ok(indices)
}

fn common_remote_dir(tracks: &[Track]) -> String {
    let names: Vec<String> = tracks
        .iter()
        .filter_map(Track::first_candidate)
        .map(|c| c.file.filename)
        .collect();
    greatest_common_remote_dir(names.iter().map(String::as_str))
}

impl BatchDownloader {
    /// Whether an entry runs interactively (item override, then config)
    pub(crate) async fn is_interactive(&self, entry: usize) -> bool {
        let lists = self.lists.lock().await;
        lists
            .entries
            .get(entry)
            .and_then(|e| e.interactive)
            .unwrap_or(self.config.download.interactive)
    }

    async fn set_interactive(&self, entry: usize, interactive: bool) {
        let mut lists = self.lists.lock().await;
        if let Some(e) = lists.entries.get_mut(entry) {
            e.interactive = Some(interactive);
        }
    }

    /// Switch an item to interactive mode
    pub(crate) async fn enter_interactive(&self, entry: usize) {
        self.set_interactive(entry, true).await;
    }

    /// Whether the full listing of a remote folder was already fetched
    pub(crate) fn folder_retrieved(&self, username: &str, folder: &str) -> bool {
        self.run
            .retrieved_folders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(username.to_string(), folder.to_string()))
    }

    /// Fetch the rest of a remote folder into a candidate group, once per run
    ///
    /// The `(username, folder)` pair is cached before the call, so a failed
    /// listing is not retried either. Returns the number of tracks added, or
    /// `None` when the listing failed or the group has no candidate.
    pub(crate) async fn complete_folder_once(
        &self,
        entry: usize,
        group: usize,
        folder: &str,
    ) -> Option<usize> {
        let tracks: Vec<Track> = {
            let lists = self.lists.lock().await;
            lists.entries.get(entry)?.list.get(group)?.clone()
        };
        let response = tracks.iter().find_map(Track::first_candidate)?.response;

        let newly_cached = self
            .run
            .retrieved_folders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((response.username.clone(), folder.to_string()));
        if !newly_cached {
            return Some(0);
        }

        tracing::debug!(user = %response.username, folder = %folder, "Retrieving full folder");
        let added = match self
            .services
            .searcher
            .complete_folder(&tracks, &response, folder)
            .await
        {
            Ok(added) => added,
            Err(e) => {
                tracing::warn!(user = %response.username, folder = %folder, error = %e, "Folder retrieval failed");
                return None;
            }
        };

        let count = added.len();
        if count > 0 {
            let mut lists = self.lists.lock().await;
            if let Some(g) = lists
                .entries
                .get_mut(entry)
                .and_then(|e| e.list.get_mut(group))
            {
                g.extend(added);
            }
            tracing::info!(folder = %folder, count, "Found more files in folder");
        }
        Some(count)
    }

    /// Let the user pick a candidate group
    ///
    /// `groups` holds the remaining candidates; folder completion refreshes the
    /// group in place. Closed input skips the item.
    pub(crate) async fn interactive_select(
        &self,
        entry: usize,
        groups: &mut [Vec<TrackRef>],
        retrieve_folder: bool,
    ) -> Selection {
        if groups.is_empty() {
            return Selection::Skip;
        }

        let interaction = self.services.interaction.clone();
        let mut pos = 0;

        loop {
            let tracks: Vec<Track> = {
                let lists = self.lists.lock().await;
                groups[pos]
                    .iter()
                    .filter_map(|at| lists.track(*at))
                    .cloned()
                    .collect()
            };
            interaction.show_candidates(pos, groups.len(), &tracks);

            let Some(line) = interaction.read_line("> ").await else {
                return Selection::Skip;
            };
            let input = line.trim();
            let (cmd, options) = input.split_once(':').unwrap_or((input, ""));

            match cmd.trim() {
                "p" => pos = (pos + groups.len() - 1) % groups.len(),
                "n" => pos = (pos + 1) % groups.len(),
                "s" => return Selection::Skip,
                "q" => return Selection::Quit,
                "y" => {
                    self.set_interactive(entry, false).await;
                    return Selection::Accept {
                        position: pos,
                        refs: groups[pos].clone(),
                        retrieve_folder,
                    };
                }
                c @ ("r" | "cd ..") if retrieve_folder => {
                    let Some(group) = groups[pos].first().map(|at| at.group) else {
                        continue;
                    };
                    let mut folder = common_remote_dir(&tracks);
                    if c == "cd .." {
                        if !folder.contains('\\') {
                            interaction.message("Already at the top directory");
                            continue;
                        }
                        folder = remote_dir_name(&folder).to_string();
                    }

                    match self.complete_folder_once(entry, group, &folder).await {
                        Some(n) if n > 0 => {
                            let lists = self.lists.lock().await;
                            groups[pos] = lists.group_refs(entry, group);
                            interaction.message(&format!("Found {} more files", n));
                        }
                        _ => interaction.message("No more files found"),
                    }
                }
                "" | "d" => {
                    if options.trim().is_empty() {
                        return Selection::Accept {
                            position: pos,
                            refs: groups[pos].clone(),
                            retrieve_folder,
                        };
                    }
                    match parse_ranges(options, groups[pos].len()) {
                        Ok(indices) => {
                            return Selection::Accept {
                                position: pos,
                                refs: indices.into_iter().map(|i| groups[pos][i]).collect(),
                                retrieve_folder: false,
                            };
                        }
                        Err(msg) => interaction.message(&msg),
                    }
                }
                _ => interaction.message(&format!("Invalid input: {}", input)),
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_are_one_based_and_ordered() {
        assert_eq!(parse_ranges("1,3-5", 6).unwrap(), vec![0, 2, 3, 4]);
        assert_eq!(parse_ranges("5,1", 6).unwrap(), vec![4, 0]);
    }

    #[test]
    fn open_ranges_extend_to_the_ends() {
        assert_eq!(parse_ranges("-2", 5).unwrap(), vec![0, 1]);
        assert_eq!(parse_ranges("4-", 5).unwrap(), vec![3, 4]);
        assert_eq!(parse_ranges("-", 3).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn overlapping_ranges_yield_each_index_once() {
        assert_eq!(parse_ranges("1-3,2-4", 4).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn bad_ranges_are_rejected() {
        assert!(parse_ranges("0", 3).is_err());
        assert!(parse_ranges("4", 3).is_err());
        assert!(parse_ranges("3-1", 3).is_err());
        assert!(parse_ranges("a", 3).is_err());
        assert!(parse_ranges("1,,2", 3).is_err());
        assert!(parse_ranges("", 3).is_err());
    }
}
