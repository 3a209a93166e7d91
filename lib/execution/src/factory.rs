use crate::inbox::TaskInbox;
use crate::operators::{JoinOperator, MatchOperator, Operator, ProjectionOperator, SliceOperator};
use crate::routing::{ParentKind, ParentTask};
use crate::task::QueryOperatorTask;
use crate::tree::{QueryExecutionTree, QueryOperatorKind, QueryOperatorNode};
use crate::QueryExecutionError;
use koral_common::KoralConfig;
use koral_encoding::containment_size;
use koral_model::TaskId;
use koral_storage::TripleStore;
use std::path::PathBuf;
use std::sync::Arc;

/// The part of the configuration that shapes individual tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSettings {
    pub number_of_slaves: u16,
    pub receiver_queue_size: usize,
    pub number_of_hash_buckets: usize,
    pub max_in_memory_mappings: usize,
    pub tmp_dir: PathBuf,
}

impl TaskSettings {
    pub fn new(config: &KoralConfig) -> Self {
        Self {
            number_of_slaves: config.number_of_slaves(),
            receiver_queue_size: config.receiver_queue_size,
            number_of_hash_buckets: config.number_of_hash_buckets,
            max_in_memory_mappings: config.max_in_memory_mappings,
            tmp_dir: config.tmp_dir.clone(),
        }
    }
}

/// Turns the nodes of a [QueryExecutionTree] into the tasks of one slave.
#[derive(Debug, Clone)]
pub struct QueryTaskFactory {
    store: Option<Arc<dyn TripleStore>>,
    settings: TaskSettings,
}

impl QueryTaskFactory {
    /// Creates a new [QueryTaskFactory]. Without a store, trees with triple pattern matches
    /// cannot be created.
    pub fn new(store: Option<Arc<dyn TripleStore>>, settings: TaskSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &TaskSettings {
        &self.settings
    }

    /// Creates one task per node. Children precede their parents.
    pub fn create_tasks(
        &self,
        tree: &QueryExecutionTree,
    ) -> Result<Vec<QueryOperatorTask>, QueryExecutionError> {
        let mut tasks = Vec::new();
        self.create_task(tree.root(), None, tree.coordinator(), &mut tasks)?;
        Ok(tasks)
    }

    fn create_task(
        &self,
        node: &QueryOperatorNode,
        parent: Option<ParentTask>,
        coordinator: TaskId,
        tasks: &mut Vec<QueryOperatorTask>,
    ) -> Result<Arc<TaskInbox>, QueryExecutionError> {
        let as_parent = ParentTask {
            id: node.id,
            kind: match &node.kind {
                QueryOperatorKind::Join { .. } => ParentKind::Join {
                    first_join_variable: node.join_variables().first().copied(),
                },
                _ => ParentKind::Projection,
            },
        };
        let children = node
            .children()
            .into_iter()
            .map(|child| self.create_task(child, Some(as_parent), coordinator, tasks))
            .collect::<Result<Vec<_>, _>>()?;
        let child_ids = children.iter().map(|child| child.id()).collect::<Vec<_>>();

        let operator = match &node.kind {
            QueryOperatorKind::Match(pattern) => {
                let store = self
                    .store
                    .as_ref()
                    .ok_or(QueryExecutionError::MissingTripleStore)?;
                Operator::Match(MatchOperator::new(pattern.clone(), Arc::clone(store)))
            }
            QueryOperatorKind::Join { left, right } => Operator::Join(JoinOperator::new(
                left.result_variables(),
                right.result_variables(),
                containment_size(self.settings.number_of_slaves),
                self.settings.number_of_hash_buckets,
                self.settings.max_in_memory_mappings,
                &self.settings.tmp_dir,
            )),
            QueryOperatorKind::Projection { child, variables } => Operator::Projection(
                ProjectionOperator::new(variables.clone(), child.result_variables()),
            ),
            QueryOperatorKind::Slice { offset, limit, .. } => Operator::Slice(SliceOperator {
                offset: *offset,
                limit: *limit,
            }),
        };

        let inbox = Arc::new(TaskInbox::new(
            node.id,
            &child_ids,
            self.settings.receiver_queue_size,
            &self.settings.tmp_dir,
        ));
        tasks.push(QueryOperatorTask::new(
            Arc::clone(&inbox),
            coordinator,
            self.settings.number_of_slaves,
            parent,
            children,
            node.result_variables(),
            operator,
            usize::try_from(node.emitted_mappings_per_round).unwrap_or(usize::MAX),
            node.estimated_load,
        ));
        Ok(inbox)
    }
}
