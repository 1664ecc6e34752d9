//! Little-endian binary codec for [`Ensemble`].
//!
//! ```text
//! "RGFM" u32:version
//! i32:tree_count f64:bias i32:feature_count str:config str:signature
//! per tree:  i32:node_count
//! per node:  i32:depth i32:parent i32:left i32:right i32:feature f64:threshold f64:weight
//! ```
//! `str` is a u32 byte length followed by UTF-8. Absent ids are `-1`.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use tracing::debug;

use super::{Ensemble, ModelNode, ModelTree};
use crate::{RgfError, Result};

const MAGIC: &[u8; 4] = b"RGFM";
const VERSION: u32 = 1;

fn to_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| RgfError::Format(format!("{what} {value} does not fit in i32")))
}

fn id_to_i32(id: Option<usize>, what: &str) -> Result<i32> {
    id.map_or(Ok(-1), |v| to_i32(v, what))
}

fn write_i32<W: Write>(w: &mut W, v: i32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_f64<W: Write>(w: &mut W, v: f64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_str<W: Write>(w: &mut W, s: &str) -> Result<()> {
    let len = u32::try_from(s.len())
        .map_err(|_| RgfError::Format(format!("string of {} bytes is too long", s.len())))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_array<R: Read, const N: usize>(r: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_i32<R: Read>(r: &mut R) -> Result<i32> {
    Ok(i32::from_le_bytes(read_array(r)?))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(r)?))
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64> {
    Ok(f64::from_le_bytes(read_array(r)?))
}

fn read_str<R: Read>(r: &mut R) -> Result<String> {
    let len = read_u32(r)? as u64;
    let mut bytes = Vec::new();
    r.take(len).read_to_end(&mut bytes)?;
    if bytes.len() as u64 != len {
        return Err(RgfError::Format("truncated string".to_string()));
    }
    String::from_utf8(bytes).map_err(|e| RgfError::Format(format!("invalid UTF-8 string: {e}")))
}

fn read_count<R: Read>(r: &mut R, what: &str) -> Result<usize> {
    let v = read_i32(r)?;
    usize::try_from(v).map_err(|_| RgfError::Format(format!("negative {what}: {v}")))
}

fn read_id<R: Read>(r: &mut R, what: &str, bound: usize) -> Result<Option<usize>> {
    match read_i32(r)? {
        -1 => Ok(None),
        v if v >= 0 && (v as usize) < bound => Ok(Some(v as usize)),
        v => Err(RgfError::Format(format!("{what} {v} out of range"))),
    }
}

impl Ensemble {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        write_i32(w, to_i32(self.trees.len(), "tree count")?)?;
        write_f64(w, self.bias)?;
        write_i32(w, to_i32(self.feature_count, "feature count")?)?;
        write_str(w, &self.config)?;
        write_str(w, &self.signature)?;

        for tree in &self.trees {
            write_i32(w, to_i32(tree.nodes().len(), "node count")?)?;
            for node in tree.nodes() {
                let (left, right) = node.children.unzip();
                write_i32(w, to_i32(node.depth, "depth")?)?;
                write_i32(w, id_to_i32(node.parent, "parent")?)?;
                write_i32(w, id_to_i32(left, "left child")?)?;
                write_i32(w, id_to_i32(right, "right child")?)?;
                write_i32(w, id_to_i32(node.feature, "feature")?)?;
                write_f64(w, node.threshold)?;
                write_f64(w, node.weight)?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let magic: [u8; 4] = read_array(r)?;
        if &magic != MAGIC {
            return Err(RgfError::Format("not a model file (bad magic)".to_string()));
        }
        let version = read_u32(r)?;
        if version != VERSION {
            return Err(RgfError::Format(format!("unsupported model version {version}")));
        }
        let tree_count = read_count(r, "tree count")?;
        let bias = read_f64(r)?;
        let feature_count = read_count(r, "feature count")?;
        let config = read_str(r)?;
        let signature = read_str(r)?;

        let mut trees = Vec::with_capacity(tree_count.min(1 << 16));
        for t in 0..tree_count {
            let node_count = read_count(r, "node count")?;
            let mut nodes = Vec::with_capacity(node_count.min(1 << 16));
            for _ in 0..node_count {
                let depth = read_count(r, "depth")?;
                let parent = read_id(r, "parent", node_count)?;
                let left = read_id(r, "left child", node_count)?;
                let right = read_id(r, "right child", node_count)?;
                let feature = read_id(r, "feature", feature_count)?;
                let threshold = read_f64(r)?;
                let weight = read_f64(r)?;
                let children = match (left, right) {
                    (Some(l), Some(r)) => Some((l, r)),
                    (None, None) => None,
                    _ => {
                        return Err(RgfError::Format(format!(
                            "tree {t}: node with a single child"
                        )))
                    }
                };
                nodes.push(ModelNode {
                    depth,
                    parent,
                    children,
                    feature,
                    threshold,
                    weight,
                });
            }
            validate_tree(t, &nodes)?;
            trees.push(ModelTree::new(nodes));
        }
        Ok(Ensemble {
            trees,
            bias,
            feature_count,
            config,
            signature,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut w = BufWriter::new(File::create(path.as_ref())?);
        self.write_to(&mut w)?;
        w.flush()?;
        debug!(path = %path.as_ref().display(), trees = self.trees.len(), "saved model");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut r = BufReader::new(File::open(path.as_ref())?);
        let model = Self::read_from(&mut r)?;
        debug!(path = %path.as_ref().display(), trees = model.trees.len(), "loaded model");
        Ok(model)
    }
}

fn validate_tree(t: usize, nodes: &[ModelNode]) -> Result<()> {
    let bad = |msg: String| Err(RgfError::Format(format!("tree {t}: {msg}")));
    match nodes.first() {
        None => return bad("no nodes".to_string()),
        Some(root) if root.parent.is_some() || root.depth != 0 => {
            return bad("root has a parent or non-zero depth".to_string())
        }
        _ => {}
    }
    for (id, node) in nodes.iter().enumerate() {
        if node.is_leaf() != node.feature.is_none() {
            return bad(format!("node {id}: feature does not match leaf status"));
        }
        if id > 0 {
            match node.parent {
                Some(p) if p < id && nodes[p].children.is_some_and(|(l, r)| l == id || r == id) => {
                    if nodes[p].depth + 1 != node.depth {
                        return bad(format!("node {id}: depth {} under parent depth {}", node.depth, nodes[p].depth));
                    }
                }
                _ => return bad(format!("node {id}: inconsistent parent link")),
            }
        }
        if let Some((l, r)) = node.children {
            if l <= id || r <= id || l == r {
                return bad(format!("node {id}: children ({l}, {r}) must follow their parent"));
            }
            if nodes[l].parent != Some(id) || nodes[r].parent != Some(id) {
                return bad(format!("node {id}: children do not point back"));
            }
        }
    }
    Ok(())
}
