//! Prompt state machine for interactive device shells.
//!
//! Every line read from the shell is classified against one combined
//! [`RegexSet`]: a prompt (login/enable/config), a pager marker, an error line,
//! or a line that needs an automatic answer (enable password, reload
//! confirmation). The handler also knows the mode transition graph so a command
//! can be routed to the mode it needs.

use std::collections::{HashMap, HashSet, VecDeque};

use log::trace;
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

use crate::error::ConnectError;

/// Automatic answer for a state that waits on input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    /// `value` is a key into the handler's dynamic parameters instead of a literal.
    pub dynamic: bool,
    pub value: String,
    /// Keep the prompt text in the command output after answering.
    pub record: bool,
}

impl Input {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            dynamic: false,
            value: value.into(),
            record: false,
        }
    }

    pub fn param(key: impl Into<String>) -> Self {
        Self {
            dynamic: true,
            value: key.into(),
            record: true,
        }
    }
}

pub struct PromptHandler {
    /// Index of the current state in `all_states`
    current_state_index: usize,

    all_states: Vec<String>,

    /// Combined regex set for matching all state patterns
    all_regex: RegexSet,

    /// Maps regex match index to state index
    regex_index_map: HashMap<usize, usize>,

    /// Index range for prompt states in `all_states` (start, end)
    prompt_index: (usize, usize),

    input_map: HashMap<String, Input>,

    /// Mode transition graph: (from_state, command, to_state)
    edges: Vec<(String, String, String)>,

    /// Values substituted for dynamic inputs (e.g. the enable password).
    pub dyn_param: HashMap<String, String>,

    current_prompt: Option<String>,
}

/// States that exist in every handler, in this order.
const PRE_STATE: [&str; 3] = ["output", "more", "error"];

impl PromptHandler {
    /// Builds a handler.
    ///
    /// * `prompt` - (state, patterns) for each shell mode
    /// * `write` - (state, answer, patterns) for lines that need input
    /// * `more_regex` - pager markers, answered with a space
    /// * `error_regex` - lines that mark a failed command
    /// * `edges` - (from, command, to) mode transitions
    pub fn new<I, S>(
        prompt: Vec<(String, I)>,
        write: Vec<(String, Input, I)>,
        more_regex: I,
        error_regex: I,
        edges: Vec<(String, String, String)>,
    ) -> Result<PromptHandler, ConnectError>
    where
        S: AsRef<str>,
        I: IntoIterator<Item = S>,
    {
        let mut all_states: Vec<String> = PRE_STATE.iter().map(|s| s.to_string()).collect();
        let mut regexs: Vec<String> = Vec::new();
        let mut regex_index_map = HashMap::new();

        regexs.extend(more_regex.into_iter().map(|s| s.as_ref().to_string()));
        for i in 0..regexs.len() {
            regex_index_map.insert(i, 1);
        }

        let start_offset = regexs.len();
        regexs.extend(error_regex.into_iter().map(|s| s.as_ref().to_string()));
        for i in start_offset..regexs.len() {
            regex_index_map.insert(i, 2);
        }

        let prompt_start = all_states.len();
        for (state, patterns) in prompt {
            let state_index = all_states.len();
            all_states.push(state.to_ascii_lowercase());

            let start_offset = regexs.len();
            // Shells often prefix the prompt with NULs and a bare carriage return.
            regexs.extend(
                patterns
                    .into_iter()
                    .map(|s| format!(r"^\x00*\r?{}", s.as_ref().trim_start_matches('^'))),
            );
            for i in start_offset..regexs.len() {
                regex_index_map.insert(i, state_index);
            }
        }
        if all_states.len() == prompt_start {
            return Err(ConnectError::InvalidHandlerConfig(
                "at least one prompt state is required".to_string(),
            ));
        }
        let prompt_index = (prompt_start, all_states.len() - 1);

        let mut input_map = HashMap::new();
        for (state, input, patterns) in write {
            let state_index = all_states.len();
            let state = state.to_ascii_lowercase();
            all_states.push(state.clone());

            let start_offset = regexs.len();
            regexs.extend(patterns.into_iter().map(|s| s.as_ref().to_string()));
            for i in start_offset..regexs.len() {
                regex_index_map.insert(i, state_index);
            }
            input_map.insert(state, input);
        }
        input_map.insert("more".to_string(), Input::literal(" "));

        let all_regex = RegexSet::new(&regexs).map_err(|err| {
            ConnectError::InvalidHandlerConfig(format!("failed to build state regex set: {err}"))
        })?;

        let edges = edges
            .into_iter()
            .map(|(from, cmd, to)| (from.to_ascii_lowercase(), cmd, to.to_ascii_lowercase()))
            .collect();

        Ok(Self {
            current_state_index: 0,
            all_states,
            all_regex,
            regex_index_map,
            prompt_index,
            input_map,
            edges,
            dyn_param: HashMap::new(),
            current_prompt: None,
        })
    }

    /// Classifies a line; unmatched lines are plain output.
    fn line2state(&self, line: &str) -> usize {
        self.all_regex
            .matches(line)
            .into_iter()
            .next()
            .and_then(|index| self.regex_index_map.get(&index).copied())
            .unwrap_or(0)
    }

    fn match_prompt(&self, index: usize) -> bool {
        let (start, end) = self.prompt_index;
        index >= start && index <= end
    }

    /// Reads a line of output and updates the current state.
    pub fn read(&mut self, line: &str) {
        let state_index = self.line2state(line);
        trace!(
            "Read line {:?} as state '{}'",
            line, self.all_states[state_index]
        );
        if self.match_prompt(state_index) {
            self.current_prompt = Some(line.trim().to_string());
        }
        self.current_state_index = state_index;
    }

    /// Checks if a (possibly unterminated) line is a prompt.
    pub fn read_prompt(&self, line: &str) -> bool {
        self.match_prompt(self.line2state(line))
    }

    /// Returns `(input, record)` when the line waits on an answer.
    pub fn read_need_write(&self, line: &str) -> Option<(String, bool)> {
        let state = &self.all_states[self.line2state(line)];
        let input = self.input_map.get(state)?;
        if input.dynamic {
            return self
                .dyn_param
                .get(&input.value)
                .map(|value| (value.clone(), input.record));
        }
        Some((input.value.clone(), input.record))
    }

    pub fn current_state(&self) -> &str {
        &self.all_states[self.current_state_index]
    }

    /// Last prompt text matched, trimmed.
    pub fn current_prompt(&self) -> Option<&str> {
        self.current_prompt.as_deref()
    }

    pub fn error(&self) -> bool {
        self.current_state() == "error"
    }

    /// Shortest command path from the current mode to `state`, found by BFS
    /// over the transition graph. Each entry is (command, state reached).
    pub fn trans_state_write(&self, state: &str) -> Result<Vec<(String, String)>, ConnectError> {
        let start_node = self.current_state().to_string();
        let end_node = state.to_ascii_lowercase();

        if start_node == end_node {
            return Ok(Vec::new());
        }
        if !self.all_states.contains(&end_node) {
            return Err(ConnectError::UnreachableState(end_node));
        }

        let mut adj_list: HashMap<&str, Vec<(&str, &str)>> = HashMap::new();
        for (from, cmd, to) in &self.edges {
            adj_list
                .entry(from.as_str())
                .or_default()
                .push((to.as_str(), cmd.as_str()));
        }

        let mut queue = VecDeque::from([start_node.as_str()]);
        let mut visited = HashSet::from([start_node.as_str()]);
        let mut predecessors: HashMap<&str, (&str, &str)> = HashMap::new();

        while let Some(current) = queue.pop_front() {
            if current == end_node {
                break;
            }
            for &(neighbor, cmd) in adj_list.get(current).into_iter().flatten() {
                if visited.insert(neighbor) {
                    predecessors.insert(neighbor, (current, cmd));
                    queue.push_back(neighbor);
                }
            }
        }

        let mut path = Vec::new();
        let mut current = end_node.as_str();
        while current != start_node {
            let Some(&(parent, cmd)) = predecessors.get(current) else {
                return Err(ConnectError::UnreachableState(end_node.clone()));
            };
            path.push((cmd.to_string(), current.to_string()));
            current = parent;
        }
        path.reverse();
        trace!("Command path: {:?}", path);
        Ok(path)
    }
}

/// Carriage returns and backspaces some shells emit at the start of a line.
pub static IGNORE_START_LINE: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
            Ok(re) => re,
            Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
        },
    );
