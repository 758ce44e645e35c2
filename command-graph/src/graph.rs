//! The frozen dependency graph of a finalized command buffer.
//!
//! There is no separate edge list: the sync points each command waits on *are* the edges. Since a
//! command can only wait on sync points produced by commands recorded before it, recording order
//! is always a valid topological order and the graph is acyclic by construction. Freezing the
//! graph re-checks that property, resolves the implicit edges of in-order command buffers, and
//! from then on the graph is never modified again.

use crate::{
    command::{CommandId, CommandRecord},
    sync::SyncPoint,
};
use smallvec::SmallVec;
use std::{cmp, error::Error, fmt, mem, num::NonZeroU64};

/// The immutable structure of a finalized command buffer.
///
/// The graph is shared between the command buffer and every submission of it, and may be read
/// concurrently without synchronization.
#[derive(Debug)]
pub struct CommandGraph {
    buffer: NonZeroU64,
    commands: Vec<CommandRecord>,
    dependencies: Vec<SmallVec<[u32; 4]>>,
    out_of_order: bool,
}

impl CommandGraph {
    /// Validates `commands` and freezes them into a graph. On success `commands` is left empty;
    /// on failure it is left untouched.
    pub(crate) fn new(
        buffer: NonZeroU64,
        commands: &mut Vec<CommandRecord>,
        out_of_order: bool,
        queue_count: usize,
    ) -> Result<Self, GraphProblem> {
        if commands.is_empty() {
            return Err(GraphProblem::Empty);
        }

        let mut dependencies = Vec::with_capacity(commands.len());

        for (index, record) in commands.iter().enumerate() {
            let command = CommandId::new(index);

            for &sync_point in &record.waits {
                if sync_point.buffer() != buffer || sync_point.index() >= index {
                    return Err(GraphProblem::ForwardReference {
                        command,
                        sync_point,
                    });
                }
            }

            if record.queue_index() >= queue_count {
                return Err(GraphProblem::UnknownQueue {
                    command,
                    queue_index: record.queue_index(),
                });
            }

            let effective = effective_dependencies(index, &record.waits, out_of_order);

            if !out_of_order && index != 0 && effective.is_empty() {
                return Err(GraphProblem::MissingDependency { command });
            }

            dependencies.push(effective);
        }

        Ok(CommandGraph {
            buffer,
            commands: mem::take(commands),
            dependencies,
            out_of_order,
        })
    }

    /// Returns the number of commands in the graph.
    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if the graph has no commands. A finalized graph is never empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Returns the commands in recording order.
    #[inline]
    pub fn commands(&self) -> &[CommandRecord] {
        &self.commands
    }

    /// Returns the command with the given ID, if it exists.
    #[inline]
    pub fn command(&self, id: CommandId) -> Option<&CommandRecord> {
        self.commands.get(id.index())
    }

    /// Returns whether the commands may execute in any order allowed by their dependencies, as
    /// opposed to recording order.
    #[inline]
    pub fn is_out_of_order(&self) -> bool {
        self.out_of_order
    }

    /// Returns the command that produced `sync_point`, or `None` if the sync point was not
    /// issued by the command buffer this graph belongs to.
    pub fn producer(&self, sync_point: SyncPoint) -> Option<CommandId> {
        (sync_point.buffer() == self.buffer && sync_point.index() < self.commands.len())
            .then(|| CommandId::new(sync_point.index()))
    }

    /// Returns the commands that must complete before `id` may begin. This includes the
    /// preceding command when the graph is in-order.
    pub fn dependencies(&self, id: CommandId) -> impl ExactSizeIterator<Item = CommandId> + '_ {
        self.dependencies
            .get(id.index())
            .map_or(&[][..], |dependencies| dependencies.as_slice())
            .iter()
            .map(|&index| CommandId::new(index as usize))
    }

    /// Groups the commands by the length of the longest dependency chain leading to them.
    ///
    /// A command's level is one more than the highest level among its dependencies, so no two
    /// commands of a level wait on each other. Levels come out in execution order, and the
    /// commands of a level in recording order.
    pub fn dependency_levels(&self) -> Vec<Vec<CommandId>> {
        let mut distances = vec![0u32; self.commands.len()];
        let mut max_level = 0;

        // Recording order is a topological order.
        for (index, dependencies) in self.dependencies.iter().enumerate() {
            for &dependency in dependencies {
                let new_distance = distances[dependency as usize] + 1;

                if distances[index] < new_distance {
                    distances[index] = new_distance;
                    max_level = cmp::max(max_level, new_distance);
                }
            }
        }

        let mut levels = vec![Vec::new(); max_level as usize + 1];

        for (index, &level) in distances.iter().enumerate() {
            levels[level as usize].push(CommandId::new(index));
        }

        levels
    }
}

fn effective_dependencies(
    index: usize,
    waits: &[SyncPoint],
    out_of_order: bool,
) -> SmallVec<[u32; 4]> {
    let mut dependencies: SmallVec<[u32; 4]> = waits
        .iter()
        .map(|sync_point| sync_point.index() as u32)
        .collect();

    if !out_of_order && index != 0 {
        dependencies.push(index as u32 - 1);
    }

    dependencies.sort_unstable();
    dependencies.dedup();

    dependencies
}

/// The reason a command buffer could not be finalized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphProblem {
    /// No commands were recorded.
    Empty,

    /// The command buffer was already finalized.
    AlreadyFinalized,

    /// A command waits on a sync point that was not produced by an earlier command of the same
    /// command buffer.
    ForwardReference {
        command: CommandId,
        sync_point: SyncPoint,
    },

    /// A command of an in-order command buffer does not depend on anything.
    MissingDependency { command: CommandId },

    /// A command targets a queue that is not in the queue list of the command buffer.
    UnknownQueue {
        command: CommandId,
        queue_index: usize,
    },
}

impl fmt::Display for GraphProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("no commands were recorded"),
            Self::AlreadyFinalized => f.write_str("the command buffer is already finalized"),
            Self::ForwardReference {
                command,
                sync_point,
            } => write!(
                f,
                "command {} waits on sync point {}, which was not produced by an earlier command",
                command.index(),
                sync_point.value(),
            ),
            Self::MissingDependency { command } => write!(
                f,
                "command {} has no dependency on the command recorded before it",
                command.index(),
            ),
            Self::UnknownQueue {
                command,
                queue_index,
            } => write!(
                f,
                "command {} targets queue {queue_index}, which the command buffer does not have",
                command.index(),
            ),
        }
    }
}

impl Error for GraphProblem {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use smallvec::smallvec;

    const BUFFER: NonZeroU64 = match NonZeroU64::new(42) {
        Some(id) => id,
        None => unreachable!(),
    };

    fn record(index: usize, waits: &[usize]) -> CommandRecord {
        CommandRecord {
            kind: CommandKind::Barrier,
            queue_index: 0,
            waits: waits.iter().map(|&i| SyncPoint::new(BUFFER, i)).collect(),
            sync_point: SyncPoint::new(BUFFER, index),
            mutable_slot: None,
        }
    }

    fn dependencies(graph: &CommandGraph, index: usize) -> Vec<usize> {
        graph
            .dependencies(CommandId::new(index))
            .map(CommandId::index)
            .collect()
    }

    #[test]
    fn empty() {
        assert_eq!(
            CommandGraph::new(BUFFER, &mut Vec::new(), false, 1).unwrap_err(),
            GraphProblem::Empty,
        );
    }

    #[test]
    fn forward_reference() {
        let mut commands = vec![record(0, &[]), record(1, &[1])];

        assert_eq!(
            CommandGraph::new(BUFFER, &mut commands, true, 1).unwrap_err(),
            GraphProblem::ForwardReference {
                command: CommandId::new(1),
                sync_point: SyncPoint::new(BUFFER, 1),
            },
        );
        // Left untouched so that recording can continue.
        assert_eq!(commands.len(), 2);

        let foreign = NonZeroU64::new(7).unwrap();
        let mut commands = vec![record(0, &[]), record(1, &[])];
        commands[1].waits = smallvec![SyncPoint::new(foreign, 0)];

        assert!(matches!(
            CommandGraph::new(BUFFER, &mut commands, true, 1),
            Err(GraphProblem::ForwardReference { .. }),
        ));
    }

    #[test]
    fn unknown_queue() {
        let mut commands = vec![record(0, &[]), record(1, &[0])];
        commands[1].queue_index = 2;

        assert_eq!(
            CommandGraph::new(BUFFER, &mut commands, false, 2).unwrap_err(),
            GraphProblem::UnknownQueue {
                command: CommandId::new(1),
                queue_index: 2,
            },
        );
    }

    #[test]
    fn in_order_dependencies() {
        let mut commands = vec![record(0, &[]), record(1, &[0]), record(2, &[0])];
        let graph = CommandGraph::new(BUFFER, &mut commands, false, 1).unwrap();
        assert!(commands.is_empty());

        assert_eq!(dependencies(&graph, 0), [] as [usize; 0]);
        assert_eq!(dependencies(&graph, 1), [0]);
        assert_eq!(dependencies(&graph, 2), [0, 1]);
        assert_eq!(
            graph.dependency_levels(),
            [
                vec![CommandId::new(0)],
                vec![CommandId::new(1)],
                vec![CommandId::new(2)],
            ],
        );
    }

    #[test]
    fn out_of_order_dependencies() {
        let mut commands = vec![
            record(0, &[]),
            record(1, &[0]),
            record(2, &[0]),
            record(3, &[1, 2, 1]),
        ];
        let graph = CommandGraph::new(BUFFER, &mut commands, true, 1).unwrap();

        assert!(graph.is_out_of_order());
        assert_eq!(dependencies(&graph, 2), [0]);
        assert_eq!(dependencies(&graph, 3), [1, 2]);
        assert_eq!(
            graph.dependency_levels(),
            [
                vec![CommandId::new(0)],
                vec![CommandId::new(1), CommandId::new(2)],
                vec![CommandId::new(3)],
            ],
        );
    }

    #[test]
    fn producer() {
        let mut commands = vec![record(0, &[]), record(1, &[])];
        let graph = CommandGraph::new(BUFFER, &mut commands, true, 1).unwrap();

        assert_eq!(
            graph.producer(SyncPoint::new(BUFFER, 1)),
            Some(CommandId::new(1)),
        );
        assert_eq!(graph.producer(SyncPoint::new(BUFFER, 2)), None);
        assert_eq!(
            graph.producer(SyncPoint::new(NonZeroU64::new(7).unwrap(), 0)),
            None,
        );
    }
}
