//! Time registry and converter-tree construction

use crate::diagnostics::{codes, SharedSink};
use crate::error::Result;

use super::converter::TimeConverter;
use super::node::{ConversionDirection, TimeKind, TimeNode, TimeTree};

/// Owns every time representation and the converters that relate them
///
/// Dyn time is always present. Every other registered kind must reach the
/// designated initializer through the initialization tree and Dyn through the
/// update tree; both trees are built by [`TimeManager::initialize`].
pub struct TimeManager {
    nodes: Vec<TimeNode>,
    converters: Vec<Box<dyn TimeConverter>>,
    initializer: Option<TimeKind>,
    update_list: Vec<usize>,
    initialized: bool,
    sink: SharedSink,
}

impl TimeManager {
    pub fn new(sink: SharedSink) -> Self {
        let mut dyn_time = TimeNode::new(TimeKind::Dyn);
        dyn_time.set_seconds(0.0);
        Self {
            nodes: vec![dyn_time],
            converters: Vec::new(),
            initializer: None,
            update_list: Vec::new(),
            initialized: false,
            sink,
        }
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    pub fn register_time(&mut self, mut node: TimeNode) -> Result<usize> {
        if self.find(node.kind).is_some() {
            return Err(self.sink.fail(
                codes::TIME_TREE,
                &format!("time {} is already registered", node.name),
            ));
        }
        node.index = self.nodes.len();
        log::debug!("Registered time {}", node.name);
        self.nodes.push(node);
        Ok(self.nodes.len() - 1)
    }

    pub fn register_converter(&mut self, converter: Box<dyn TimeConverter>) -> Result<usize> {
        let (a, b) = (converter.a_kind(), converter.b_kind());
        let duplicate = self.converters.iter().any(|existing| {
            let pair = (existing.a_kind(), existing.b_kind());
            pair == (a, b) || pair == (b, a)
        });
        if duplicate {
            return Err(self.sink.fail(
                codes::TIME_CONVERTER,
                &format!("a converter between {} and {} is already registered", a.name(), b.name()),
            ));
        }
        log::debug!("Registered time converter {}", converter.name());
        self.converters.push(converter);
        Ok(self.converters.len() - 1)
    }

    /// Designate the time whose value seeds every other time at startup
    pub fn set_initializer(&mut self, kind: TimeKind) {
        self.initializer = Some(kind);
    }

    pub fn initializer(&self) -> Option<TimeKind> {
        self.initializer
    }

    pub fn find(&self, kind: TimeKind) -> Option<usize> {
        self.nodes.iter().position(|node| node.kind == kind)
    }

    pub fn time(&self, kind: TimeKind) -> Option<&TimeNode> {
        self.nodes.iter().find(|node| node.kind == kind)
    }

    pub fn time_mut(&mut self, kind: TimeKind) -> Option<&mut TimeNode> {
        self.nodes.iter_mut().find(|node| node.kind == kind)
    }

    pub fn nodes(&self) -> &[TimeNode] {
        &self.nodes
    }

    pub fn converters(&self) -> impl Iterator<Item = &dyn TimeConverter> {
        self.converters.iter().map(|converter| converter.as_ref())
    }

    /// Node indices in the order [`TimeManager::update`] derives them
    pub fn update_list(&self) -> &[usize] {
        &self.update_list
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Elapsed dynamic time (s)
    pub fn dyn_seconds(&self) -> f64 {
        self.nodes[0].seconds()
    }

    /// Build both trees, seed every time from the initializer and let
    /// converters capture their startup offsets
    pub fn initialize(&mut self) -> Result<()> {
        let initializer = self
            .initializer
            .ok_or_else(|| self.sink.fail(codes::TIME_TREE, "no initializer time designated"))?;
        let root = self.find(initializer).ok_or_else(|| {
            self.sink.fail(
                codes::TIME_TREE,
                &format!("initializer time {} is not registered", initializer.name()),
            )
        })?;
        if !self.nodes[root].is_initialized() {
            return Err(self.sink.fail(
                codes::TIME_TREE,
                &format!("initializer time {} has no value", initializer.name()),
            ));
        }

        self.build_tree(TimeTree::Initialization, root)?;
        for index in tree_order(&self.nodes, TimeTree::Initialization) {
            // Dyn carries the run's elapsed time and is never derived
            if self.nodes[index].kind == TimeKind::Dyn {
                continue;
            }
            if let Some(days) = self.derived_days(index, TimeTree::Initialization) {
                self.nodes[index].set_days(days);
            }
        }

        self.build_tree(TimeTree::Update, 0)?;
        for converter in &mut self.converters {
            let a = self.nodes.iter().find(|node| node.kind == converter.a_kind());
            let b = self.nodes.iter().find(|node| node.kind == converter.b_kind());
            if let (Some(a), Some(b)) = (a, b) {
                converter.initialize(a.days(), b.days());
            }
        }

        self.organize_update_list();
        self.initialized = true;
        log::info!(
            "Time system initialized from {} with {} times and {} converters",
            initializer.name(),
            self.nodes.len(),
            self.converters.len()
        );
        Ok(())
    }

    /// Order the update tree parents before children
    pub fn organize_update_list(&mut self) {
        self.update_list = tree_order(&self.nodes, TimeTree::Update);
    }

    /// Set dynamic time and derive every other time from it
    pub fn update(&mut self, dyn_seconds: f64) -> Result<()> {
        if !self.initialized {
            return Err(self
                .sink
                .fail(codes::TIME_TREE, "time manager updated before initialization"));
        }
        self.nodes[0].set_seconds(dyn_seconds);
        for &index in &self.update_list {
            if let Some(days) = self.derived_days(index, TimeTree::Update) {
                self.nodes[index].set_days(days);
            }
        }
        Ok(())
    }

    fn derived_days(&self, index: usize, tree: TimeTree) -> Option<f64> {
        let links = self.nodes[index].links(tree);
        let parent = links.parent()?;
        let (converter, direction) = links.converter()?;
        Some(self.converters[converter].convert(direction, self.nodes[parent].days()))
    }

    /// Converter usable to compute `to` from `from` while building `tree`
    fn usable_converter(
        &self,
        from: TimeKind,
        to: TimeKind,
        tree: TimeTree,
    ) -> Option<(usize, ConversionDirection)> {
        self.converters.iter().enumerate().find_map(|(index, converter)| {
            let caps = converter.capabilities();
            if converter.a_kind() == from
                && converter.b_kind() == to
                && caps.allows(ConversionDirection::AToB, tree)
            {
                Some((index, ConversionDirection::AToB))
            } else if converter.b_kind() == from
                && converter.a_kind() == to
                && caps.allows(ConversionDirection::BToA, tree)
            {
                Some((index, ConversionDirection::BToA))
            } else {
                None
            }
        })
    }

    /// Auto-seek construction
    ///
    /// Each pass considers only nodes placed before the pass began, so
    /// generations grow one level per pass and a node lands under the
    /// shallowest parent that can reach it.
    fn build_tree(&mut self, tree: TimeTree, root: usize) -> Result<()> {
        for node in &mut self.nodes {
            node.links_mut(tree).clear();
        }
        self.nodes[root].links_mut(tree).generation = Some(0);

        loop {
            let mut placed: Vec<usize> = (0..self.nodes.len())
                .filter(|&index| self.nodes[index].links(tree).is_placed())
                .collect();
            placed.sort_by_key(|&index| (self.nodes[index].links(tree).generation(), index));
            let unplaced: Vec<usize> = (0..self.nodes.len())
                .filter(|&index| !self.nodes[index].links(tree).is_placed())
                .collect();
            let Some(&first) = unplaced.first() else {
                return Ok(());
            };

            let mut progress = false;
            for child in unplaced {
                if let Some((parent, converter, auto)) = self.seek_parent(tree, child, &placed)? {
                    self.place(tree, child, parent, converter, auto);
                    progress = true;
                }
            }
            if !progress {
                return Err(self.sink.fail(
                    codes::TIME_TREE,
                    &format!(
                        "cannot place time {} in the {} tree",
                        self.nodes[first].name,
                        tree.name()
                    ),
                ));
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn seek_parent(
        &self,
        tree: TimeTree,
        child: usize,
        placed: &[usize],
    ) -> Result<Option<(usize, (usize, ConversionDirection), bool)>> {
        let node = &self.nodes[child];
        if let Some(parent_kind) = node.links(tree).user_parent {
            let parent = self.find(parent_kind).ok_or_else(|| {
                self.sink.fail(
                    codes::TIME_TREE,
                    &format!("time {} names unregistered parent {}", node.name, parent_kind.name()),
                )
            })?;
            if !placed.contains(&parent) {
                return Ok(None);
            }
            let converter = self.usable_converter(parent_kind, node.kind, tree).ok_or_else(|| {
                self.sink.fail(
                    codes::TIME_CONVERTER,
                    &format!(
                        "no converter computes {} from {} in the {} tree",
                        node.name,
                        parent_kind.name(),
                        tree.name()
                    ),
                )
            })?;
            return Ok(Some((parent, converter, false)));
        }

        Ok(placed.iter().find_map(|&parent| {
            self.usable_converter(self.nodes[parent].kind, node.kind, tree)
                .map(|converter| (parent, converter, true))
        }))
    }

    fn place(
        &mut self,
        tree: TimeTree,
        child: usize,
        parent: usize,
        converter: (usize, ConversionDirection),
        auto: bool,
    ) {
        let generation = self.nodes[parent].links(tree).generation().unwrap_or(0) + 1;
        let links = self.nodes[child].links_mut(tree);
        links.parent = Some(parent);
        links.converter = Some(converter);
        links.generation = Some(generation);
        self.nodes[parent].links_mut(tree).children.push(child);

        if auto {
            self.sink.inform(
                codes::TIME_INFO,
                &format!(
                    "{} tree: {} placed under {} via {}",
                    tree.name(),
                    self.nodes[child].name,
                    self.nodes[parent].name,
                    self.converters[converter.0].name()
                ),
            );
        }
    }
}

/// Placed non-root nodes of `tree`, parents before children
pub(crate) fn tree_order(nodes: &[TimeNode], tree: TimeTree) -> Vec<usize> {
    let mut order: Vec<usize> = (0..nodes.len())
        .filter(|&index| {
            let links = nodes[index].links(tree);
            links.is_placed() && links.parent().is_some()
        })
        .collect();
    order.sort_by_key(|&index| nodes[index].links(tree).generation());
    order
}
