use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct Rendezvous {
    members: usize,
    arrived: usize,
    generation: u64,
}

impl Rendezvous {
    fn release_if_full(&mut self) {
        if self.arrived >= self.members {
            self.arrived = 0;
            self.generation += 1;
        }
    }
}

/// Counting rendezvous for `S_BARRIER`, one per workgroup.
///
/// A wave arriving at a barrier records the generation it waits on and is
/// released once the generation has moved past it.
#[derive(Debug, Default)]
pub struct BarrierTable {
    groups: Mutex<HashMap<usize, Rendezvous>>,
}

impl BarrierTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares how many waves take part in `workgroup`'s barriers.
    pub fn register(&self, workgroup: usize, members: usize) {
        if let Ok(mut groups) = self.groups.lock() {
            groups.insert(
                workgroup,
                Rendezvous {
                    members,
                    arrived: 0,
                    generation: 0,
                },
            );
        }
    }

    /// Returns the generation the caller waits on. Unregistered workgroups
    /// behave as a group of one.
    pub fn arrive(&self, workgroup: usize) -> u64 {
        let mut groups = match self.groups.lock() {
            Ok(groups) => groups,
            Err(poisoned) => poisoned.into_inner(),
        };
        let group = groups.entry(workgroup).or_insert(Rendezvous {
            members: 1,
            arrived: 0,
            generation: 0,
        });
        let waiting_on = group.generation;
        group.arrived += 1;
        group.release_if_full();
        waiting_on
    }

    pub fn is_released(&self, workgroup: usize, generation: u64) -> bool {
        match self.groups.lock() {
            Ok(groups) => groups
                .get(&workgroup)
                .map_or(true, |group| group.generation > generation),
            Err(_) => false,
        }
    }

    /// Removes a finished wave from its group so the others do not wait on it.
    pub fn retire(&self, workgroup: usize) {
        if let Ok(mut groups) = self.groups.lock() {
            if let Some(group) = groups.get_mut(&workgroup) {
                group.members = group.members.saturating_sub(1);
                if group.members > 0 && group.arrived > 0 {
                    group.release_if_full();
                }
            }
        }
    }
}
