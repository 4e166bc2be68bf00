//! Allocatable pools of work items. An `IdManager` tracks the lifecycle
//! of numbered items; a `ResourceManager` pairs the same lifecycle with
//! the input range each item covers. Reduce partitions use the bare
//! `IdManager`, map inputs the `ResourceManager`; the tracker drives both
//! through the same operations.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use errors::*;
use util::data_layer::AbstractionLayer;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Pending,
    Allocated,
    Done,
}

/// Lifecycle of one numbered work item. `allocated` counts the attempts
/// currently outstanding; it can exceed one while the end game hands out
/// speculative replicas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdItem {
    pub no: i32,
    pub attempt: i32,
    pub status: ResourceStatus,
    pub allocated: i32,
}

impl IdItem {
    pub fn fresh(no: i32) -> Self {
        IdItem {
            no: no,
            attempt: 0,
            status: ResourceStatus::Pending,
            allocated: 0,
        }
    }
}

/// An `IdItem` plus the input range it covers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceItem {
    pub no: i32,
    pub attempt: i32,
    pub status: ResourceStatus,
    pub allocated: i32,
    pub input_file: String,
    pub offset: i64,
    pub size: i64,
}

impl ResourceItem {
    fn from_parts(id: &IdItem, span: &InputSpan) -> Self {
        ResourceItem {
            no: id.no,
            attempt: id.attempt,
            status: id.status,
            allocated: id.allocated,
            input_file: span.input_file.clone(),
            offset: span.offset,
            size: span.size,
        }
    }

    pub fn id_part(&self) -> IdItem {
        IdItem {
            no: self.no,
            attempt: self.attempt,
            status: self.status,
            allocated: self.allocated,
        }
    }
}

/// The byte range of one input file covered by a single map item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputSpan {
    pub input_file: String,
    pub offset: i64,
    pub size: i64,
}

pub struct IdManager {
    items: Vec<IdItem>,
    pending_queue: VecDeque<i32>,
    pending: i32,
    allocated: i32,
    done: i32,
    parallel_attempts: i32,
}

impl IdManager {
    pub fn new(n: i32, parallel_attempts: i32) -> Self {
        let mut items = Vec::new();
        let mut pending_queue = VecDeque::new();
        for no in 0..n {
            items.push(IdItem::fresh(no));
            pending_queue.push_back(no);
        }
        IdManager {
            items: items,
            pending_queue: pending_queue,
            pending: n,
            allocated: 0,
            done: 0,
            parallel_attempts: parallel_attempts,
        }
    }

    /// Hands out the next pending item, or nothing if the pool is drained.
    pub fn get_item(&mut self) -> Option<IdItem> {
        loop {
            let no = match self.pending_queue.front() {
                Some(&no) => no,
                None => return None,
            };
            if self.items[no as usize].status == ResourceStatus::Pending {
                break;
            }
            self.pending_queue.pop_front();
        }
        let no = match self.pending_queue.pop_front() {
            Some(no) => no,
            None => return None,
        };
        let item = &mut self.items[no as usize];
        item.attempt += 1;
        item.status = ResourceStatus::Allocated;
        item.allocated += 1;
        self.pending -= 1;
        self.allocated += 1;
        Some(item.clone())
    }

    /// Forces a replica attempt of a specific item. Refused once the item
    /// is done or already running `parallel_attempts` attempts.
    pub fn get_certain_item(&mut self, no: i32) -> Option<IdItem> {
        if no < 0 || no as usize >= self.items.len() {
            warn!("item not valid for duplication: {}", no);
            return None;
        }
        if self.items[no as usize].allocated >= self.parallel_attempts {
            info!("item distribution has reached limitation: {}", no);
            return None;
        }
        if self.items[no as usize].status == ResourceStatus::Pending {
            self.items[no as usize].status = ResourceStatus::Allocated;
            self.pending -= 1;
            self.allocated += 1;
        }
        let item = &mut self.items[no as usize];
        match item.status {
            ResourceStatus::Allocated => {
                item.attempt += 1;
                item.allocated += 1;
                Some(item.clone())
            }
            ResourceStatus::Done => {
                info!("item has already been done: {}", no);
                None
            }
            ResourceStatus::Pending => None,
        }
    }

    /// Gives an outstanding attempt back. The item returns to pending once
    /// no other attempt is still out.
    pub fn return_back_item(&mut self, no: i32) {
        if no < 0 || no as usize >= self.items.len() {
            warn!("item not valid for returning: {}", no);
            return;
        }
        let item = &mut self.items[no as usize];
        if item.status == ResourceStatus::Allocated {
            item.allocated -= 1;
            if item.allocated <= 0 {
                item.status = ResourceStatus::Pending;
                self.pending_queue.push_front(no);
                self.allocated -= 1;
                self.pending += 1;
            }
        } else {
            warn!("returned item is not allocated: {}", no);
        }
    }

    /// Marks an item done. Returns false if it was not allocated any more,
    /// which is how a losing duplicate completion is detected.
    pub fn finish_item(&mut self, no: i32) -> bool {
        if no < 0 || no as usize >= self.items.len() {
            warn!("item not valid for finishing: {}", no);
            return false;
        }
        let item = &mut self.items[no as usize];
        if item.status == ResourceStatus::Allocated {
            item.status = ResourceStatus::Done;
            item.allocated = 0;
            self.allocated -= 1;
            self.done += 1;
            return true;
        }
        warn!("item may have been finished already: {}", no);
        false
    }

    pub fn is_allocated(&self, no: i32) -> bool {
        if no < 0 || no as usize >= self.items.len() {
            return false;
        }
        self.items[no as usize].status == ResourceStatus::Allocated
    }

    pub fn is_done(&self, no: i32) -> bool {
        if no < 0 || no as usize >= self.items.len() {
            return false;
        }
        self.items[no as usize].status == ResourceStatus::Done
    }

    pub fn sum_of_item(&self) -> i32 {
        self.items.len() as i32
    }

    pub fn pending(&self) -> i32 {
        self.pending
    }

    pub fn allocated(&self) -> i32 {
        self.allocated
    }

    pub fn done(&self) -> i32 {
        self.done
    }

    /// Replaces the pool with a replayed one and recounts the totals.
    pub fn load(&mut self, data: Vec<IdItem>) {
        self.items = data;
        self.pending = 0;
        self.allocated = 0;
        self.done = 0;
        self.pending_queue.clear();
        for item in &self.items {
            match item.status {
                ResourceStatus::Pending => {
                    self.pending += 1;
                    self.pending_queue.push_back(item.no);
                }
                ResourceStatus::Allocated => self.allocated += 1,
                ResourceStatus::Done => self.done += 1,
            }
        }
    }

    pub fn dump(&self) -> Vec<IdItem> {
        self.items.clone()
    }
}

pub struct ResourceManager {
    spans: Vec<InputSpan>,
    ids: IdManager,
}

impl ResourceManager {
    pub fn new(spans: Vec<InputSpan>, parallel_attempts: i32) -> Self {
        let ids = IdManager::new(spans.len() as i32, parallel_attempts);
        ResourceManager {
            spans: spans,
            ids: ids,
        }
    }

    fn combine(&self, id: &IdItem) -> ResourceItem {
        ResourceItem::from_parts(id, &self.spans[id.no as usize])
    }

    pub fn get_item(&mut self) -> Option<ResourceItem> {
        let id = match self.ids.get_item() {
            Some(id) => id,
            None => return None,
        };
        Some(self.combine(&id))
    }

    pub fn get_certain_item(&mut self, no: i32) -> Option<ResourceItem> {
        let id = match self.ids.get_certain_item(no) {
            Some(id) => id,
            None => return None,
        };
        Some(self.combine(&id))
    }

    pub fn return_back_item(&mut self, no: i32) {
        self.ids.return_back_item(no)
    }

    pub fn finish_item(&mut self, no: i32) -> bool {
        self.ids.finish_item(no)
    }

    pub fn is_allocated(&self, no: i32) -> bool {
        self.ids.is_allocated(no)
    }

    pub fn is_done(&self, no: i32) -> bool {
        self.ids.is_done(no)
    }

    pub fn sum_of_item(&self) -> i32 {
        self.ids.sum_of_item()
    }

    pub fn pending(&self) -> i32 {
        self.ids.pending()
    }

    pub fn allocated(&self) -> i32 {
        self.ids.allocated()
    }

    pub fn done(&self) -> i32 {
        self.ids.done()
    }

    /// Rebuilds the pool from dumped items. The input ranges come from the
    /// dumped rows; the lifecycle fields come from the same rows, which the
    /// caller has already merged with any replayed history.
    pub fn load(&mut self, data: Vec<ResourceItem>) {
        self.spans = data.iter()
            .map(|item| {
                InputSpan {
                    input_file: item.input_file.clone(),
                    offset: item.offset,
                    size: item.size,
                }
            })
            .collect();
        self.ids.load(data.iter().map(ResourceItem::id_part).collect());
    }

    pub fn dump(&self) -> Vec<ResourceItem> {
        self.ids
            .dump()
            .iter()
            .map(|id| self.combine(id))
            .collect()
    }
}

fn expand_inputs(layer: &AbstractionLayer, inputs: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let path = Path::new(input);
        if layer.is_dir(path).chain_err(|| "Unable to stat input")? {
            let mut entries = layer.read_dir(path).chain_err(
                || "Unable to list input directory",
            )?;
            entries.sort();
            for entry in entries {
                if layer.is_file(&entry).chain_err(|| "Unable to stat input")? {
                    files.push(entry);
                }
            }
        } else {
            files.push(PathBuf::from(input));
        }
    }
    Ok(files)
}

/// Carves the input files into `block_size`-byte spans, one item each.
/// Every file contributes at least one item, so an empty input file still
/// produces a (zero-length) map task.
pub fn plan_byte_blocks(
    layer: &AbstractionLayer,
    inputs: &[String],
    block_size: i64,
) -> Result<Vec<InputSpan>> {
    let files = expand_inputs(layer, inputs)?;
    let mut spans = Vec::new();
    for file in files {
        let size = layer.file_size(&file).chain_err(|| {
            format!("Unable to get size of input {:?}", file)
        })? as i64;
        let name = file.to_string_lossy().to_string();
        let blocks = size / block_size;
        for i in 0..blocks {
            spans.push(InputSpan {
                input_file: name.clone(),
                offset: i * block_size,
                size: block_size,
            });
        }
        let rest = size - blocks * block_size;
        if rest > 0 || blocks == 0 {
            spans.push(InputSpan {
                input_file: name.clone(),
                offset: blocks * block_size,
                size: rest,
            });
        }
    }
    Ok(spans)
}

/// Carves the input files into one span per line, newline included.
pub fn plan_nline(layer: &AbstractionLayer, inputs: &[String]) -> Result<Vec<InputSpan>> {
    let files = expand_inputs(layer, inputs)?;
    let mut spans = Vec::new();
    for file in files {
        let name = file.to_string_lossy().to_string();
        let handle = layer.open_file(&file).chain_err(|| {
            format!("Unable to open input {:?}", file)
        })?;
        let mut reader = BufReader::new(handle);
        let mut offset: i64 = 0;
        loop {
            let mut line = String::new();
            let read = reader.read_line(&mut line).chain_err(|| {
                format!("Unable to read input {:?}", file)
            })?;
            if read == 0 {
                break;
            }
            spans.push(InputSpan {
                input_file: name.clone(),
                offset: offset,
                size: read as i64,
            });
            offset += read as i64;
        }
    }
    Ok(spans)
}
