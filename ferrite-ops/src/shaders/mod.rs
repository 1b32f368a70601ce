//! WGSL source for the kernel library. Shader bodies are a thin, representative
//! implementation of each op's dispatch shape — the numerical kernels themselves are out of
//! scope for this crate's contract, which only promises the host-side binding layout each
//! kernel name resolves to (layout buffer, then one buffer per tensor argument, in argument
//! order; scalars get their own small buffer).

use std::collections::HashMap;

use ferrite_kernel::{KernelName, KernelSource};

/// Ops this library compiles a shader for, independent of dtype.
const OPS: &[&str] = &[
    "matmul",
    "hadamard",
    "hadamard_broadcast",
    "scalar_mul",
    "add",
    "sub",
    "div",
    "add2",
    "softmax",
    "silu",
    "rmsnorm",
    "rope",
    "copy",
    "scatter",
    "gather",
    "roll",
    "sort",
    "cumsum",
    "sum",
    "multinomial",
    "embedding",
    "gt",
];

/// Dtypes the runtime actually dispatches these ops over. Unlike a general shader DSL, this
/// library only ever needs to resolve the names `ferrite-ops` itself constructs.
const DTYPES: &[&str] = &["f32", "i32"];

const LAYOUT_STRUCT: &str = r#"
struct Layout {
    rank: u32,
    _pad: u32,
    sizes: array<u32, 8>,
    strides: array<u32, 8>,
    offsets: array<u32, 8>,
}
"#;

/// A binary elementwise kernel: `out[i] = lhs[i] <op> rhs[i]`.
fn elementwise_binary(op: &str) -> String {
    format!(
        r#"{LAYOUT_STRUCT}
@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(2) var<storage, read> lhs_layout: Layout;
@group(0) @binding(3) var<storage, read> lhs_data: array<f32>;
@group(0) @binding(4) var<storage, read> rhs_layout: Layout;
@group(0) @binding(5) var<storage, read> rhs_data: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let i = gid.x;
    if (i >= arrayLength(&out_data)) {{ return; }}
    out_data[i] = lhs_data[i] {op} rhs_data[i];
}}
"#
    )
}

/// A unary elementwise kernel: `out[i] = f(in[i])`.
fn elementwise_unary(body: &str) -> String {
    format!(
        r#"{LAYOUT_STRUCT}
@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(2) var<storage, read> in_layout: Layout;
@group(0) @binding(3) var<storage, read> in_data: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let i = gid.x;
    if (i >= arrayLength(&out_data)) {{ return; }}
    let x = in_data[i];
    out_data[i] = {body};
}}
"#
    )
}

const MATMUL: &str = r#"
struct Layout {
    rank: u32,
    _pad: u32,
    sizes: array<u32, 8>,
    strides: array<u32, 8>,
    offsets: array<u32, 8>,
}

@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(2) var<storage, read> lhs_layout: Layout;
@group(0) @binding(3) var<storage, read> lhs_data: array<f32>;
@group(0) @binding(4) var<storage, read> rhs_layout: Layout;
@group(0) @binding(5) var<storage, read> rhs_data: array<f32>;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let m = out_layout.sizes[0];
    let n = out_layout.sizes[1];
    let k = lhs_layout.sizes[1];
    let row = gid.y;
    let col = gid.x;
    if (row >= m || col >= n) { return; }
    var acc = 0.0;
    for (var i = 0u; i < k; i = i + 1u) {
        acc = acc + lhs_data[row * k + i] * rhs_data[i * n + col];
    }
    out_data[row * n + col] = acc;
}
"#;

const SOFTMAX: &str = r#"
struct Layout {
    rank: u32,
    _pad: u32,
    sizes: array<u32, 8>,
    strides: array<u32, 8>,
    offsets: array<u32, 8>,
}

@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(2) var<storage, read> in_layout: Layout;
@group(0) @binding(3) var<storage, read> in_data: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let row_len = in_layout.sizes[in_layout.rank - 1u];
    let row = gid.x;
    let base = row * row_len;
    var max_val = in_data[base];
    for (var i = 1u; i < row_len; i = i + 1u) {
        max_val = max(max_val, in_data[base + i]);
    }
    var sum = 0.0;
    for (var i = 0u; i < row_len; i = i + 1u) {
        sum = sum + exp(in_data[base + i] - max_val);
    }
    for (var i = 0u; i < row_len; i = i + 1u) {
        out_data[base + i] = exp(in_data[base + i] - max_val) / sum;
    }
}
"#;

const RMSNORM: &str = r#"
struct Layout {
    rank: u32,
    _pad: u32,
    sizes: array<u32, 8>,
    strides: array<u32, 8>,
    offsets: array<u32, 8>,
}

@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(2) var<storage, read> in_layout: Layout;
@group(0) @binding(3) var<storage, read> in_data: array<f32>;
@group(0) @binding(4) var<storage, read> weight_layout: Layout;
@group(0) @binding(5) var<storage, read> weight_data: array<f32>;
@group(0) @binding(6) var<storage, read> eps_data: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let row_len = in_layout.sizes[in_layout.rank - 1u];
    let row = gid.x;
    let base = row * row_len;
    var sum_sq = 0.0;
    for (var i = 0u; i < row_len; i = i + 1u) {
        sum_sq = sum_sq + in_data[base + i] * in_data[base + i];
    }
    let scale = inverseSqrt(sum_sq / f32(row_len) + eps_data[0]);
    for (var i = 0u; i < row_len; i = i + 1u) {
        out_data[base + i] = in_data[base + i] * scale * weight_data[i];
    }
}
"#;

const ROPE: &str = r#"
struct Layout {
    rank: u32,
    _pad: u32,
    sizes: array<u32, 8>,
    strides: array<u32, 8>,
    offsets: array<u32, 8>,
}

@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(2) var<storage, read> in_layout: Layout;
@group(0) @binding(3) var<storage, read> in_data: array<f32>;
@group(0) @binding(4) var<storage, read> freqs_layout: Layout;
@group(0) @binding(5) var<storage, read> freqs_data: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let head_dim = in_layout.sizes[in_layout.rank - 1u];
    let half_dim = head_dim / 2u;
    let pos = gid.y;
    let pair = gid.x;
    if (pair >= half_dim) { return; }
    let base = pos * head_dim;
    let angle = freqs_data[pos * half_dim + pair];
    let cos_a = cos(angle);
    let sin_a = sin(angle);
    let a = in_data[base + pair];
    let b = in_data[base + pair + half_dim];
    out_data[base + pair] = a * cos_a - b * sin_a;
    out_data[base + pair + half_dim] = a * sin_a + b * cos_a;
}
"#;

const EMBEDDING: &str = r#"
struct Layout {
    rank: u32,
    _pad: u32,
    sizes: array<u32, 8>,
    strides: array<u32, 8>,
    offsets: array<u32, 8>,
}

@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(2) var<storage, read> table_layout: Layout;
@group(0) @binding(3) var<storage, read> table_data: array<f32>;
@group(0) @binding(4) var<storage, read> ids_layout: Layout;
@group(0) @binding(5) var<storage, read> ids_data: array<i32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dim = table_layout.sizes[table_layout.rank - 1u];
    let row = gid.y;
    let col = gid.x;
    if (col >= dim) { return; }
    let id = u32(ids_data[row]);
    out_data[row * dim + col] = table_data[id * dim + col];
}
"#;

const ROLL: &str = r#"
struct Layout {
    rank: u32,
    _pad: u32,
    sizes: array<u32, 8>,
    strides: array<u32, 8>,
    offsets: array<u32, 8>,
}

@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(2) var<storage, read> in_layout: Layout;
@group(0) @binding(3) var<storage, read> in_data: array<f32>;
@group(0) @binding(4) var<storage, read> shift_data: array<i32>;
@group(0) @binding(5) var<storage, read> dim_size_data: array<u32>;
@group(0) @binding(6) var<storage, read> inner_data: array<u32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let n = arrayLength(&out_data);
    let idx = gid.x;
    if (idx >= n) { return; }
    let dim_size = dim_size_data[0];
    let inner = inner_data[0];
    let shift = u32(shift_data[0]) % max(dim_size, 1u);
    let group_size = dim_size * inner;
    let outer = idx / group_size;
    let rem = idx % group_size;
    let row = rem / inner;
    let i = rem % inner;
    let shifted_row = (row + shift) % dim_size;
    out_data[idx] = in_data[outer * group_size + shifted_row * inner + i];
}
"#;

const SCATTER: &str = r#"
struct Layout {
    rank: u32,
    _pad: u32,
    sizes: array<u32, 8>,
    strides: array<u32, 8>,
    offsets: array<u32, 8>,
}

@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(2) var<storage, read> index_layout: Layout;
@group(0) @binding(3) var<storage, read> index_data: array<i32>;
@group(0) @binding(4) var<storage, read> src_layout: Layout;
@group(0) @binding(5) var<storage, read> src_data: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= arrayLength(&src_data)) { return; }
    out_data[u32(index_data[i])] = src_data[i];
}
"#;

const GATHER: &str = r#"
struct Layout {
    rank: u32,
    _pad: u32,
    sizes: array<u32, 8>,
    strides: array<u32, 8>,
    offsets: array<u32, 8>,
}

@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(2) var<storage, read> src_layout: Layout;
@group(0) @binding(3) var<storage, read> src_data: array<f32>;
@group(0) @binding(4) var<storage, read> index_layout: Layout;
@group(0) @binding(5) var<storage, read> index_data: array<i32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= arrayLength(&out_data)) { return; }
    out_data[i] = src_data[u32(index_data[i])];
}
"#;

const SORT: &str = r#"
struct Layout {
    rank: u32,
    _pad: u32,
    sizes: array<u32, 8>,
    strides: array<u32, 8>,
    offsets: array<u32, 8>,
}

@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(2) var<storage, read_write> out_index_data: array<i32>;
@group(0) @binding(3) var<storage, read> in_layout: Layout;
@group(0) @binding(4) var<storage, read> in_data: array<f32>;

// Single-workgroup bitonic-adjacent bubble pass over one row; adequate for the sampler's
// short candidate lists, not a general sort.
@compute @workgroup_size(1)
fn main() {
    let n = arrayLength(&in_data);
    for (var i = 0u; i < n; i = i + 1u) {
        out_data[i] = in_data[i];
        out_index_data[i] = i32(i);
    }
    for (var i = 0u; i < n; i = i + 1u) {
        for (var j = 0u; j + 1u < n - i; j = j + 1u) {
            if (out_data[j] < out_data[j + 1u]) {
                let tmp = out_data[j];
                out_data[j] = out_data[j + 1u];
                out_data[j + 1u] = tmp;
                let tmp_idx = out_index_data[j];
                out_index_data[j] = out_index_data[j + 1u];
                out_index_data[j + 1u] = tmp_idx;
            }
        }
    }
}
"#;

const CUMSUM: &str = r#"
struct Layout {
    rank: u32,
    _pad: u32,
    sizes: array<u32, 8>,
    strides: array<u32, 8>,
    offsets: array<u32, 8>,
}

@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(2) var<storage, read> in_layout: Layout;
@group(0) @binding(3) var<storage, read> in_data: array<f32>;

@compute @workgroup_size(1)
fn main() {
    var acc = 0.0;
    let n = arrayLength(&in_data);
    for (var i = 0u; i < n; i = i + 1u) {
        acc = acc + in_data[i];
        out_data[i] = acc;
    }
}
"#;

const SUM: &str = r#"
struct Layout {
    rank: u32,
    _pad: u32,
    sizes: array<u32, 8>,
    strides: array<u32, 8>,
    offsets: array<u32, 8>,
}

@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(2) var<storage, read> in_layout: Layout;
@group(0) @binding(3) var<storage, read> in_data: array<f32>;

@compute @workgroup_size(1)
fn main() {
    var acc = 0.0;
    let n = arrayLength(&in_data);
    for (var i = 0u; i < n; i = i + 1u) {
        acc = acc + in_data[i];
    }
    out_data[0] = acc;
}
"#;

const MULTINOMIAL: &str = r#"
struct Layout {
    rank: u32,
    _pad: u32,
    sizes: array<u32, 8>,
    strides: array<u32, 8>,
    offsets: array<u32, 8>,
}

@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<i32>;
@group(0) @binding(2) var<storage, read> probs_layout: Layout;
@group(0) @binding(3) var<storage, read> probs_data: array<f32>;
@group(0) @binding(4) var<storage, read> uniform_data: array<f32>;

@compute @workgroup_size(1)
fn main() {
    let n = arrayLength(&probs_data);
    let u = uniform_data[0];
    var acc = 0.0;
    var chosen = n - 1u;
    for (var i = 0u; i < n; i = i + 1u) {
        acc = acc + probs_data[i];
        if (u <= acc) {
            chosen = i;
            break;
        }
    }
    out_data[0] = i32(chosen);
}
"#;

const HADAMARD_BROADCAST: &str = r#"
struct Layout {
    rank: u32,
    _pad: u32,
    sizes: array<u32, 8>,
    strides: array<u32, 8>,
    offsets: array<u32, 8>,
}

@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(2) var<storage, read> weights_layout: Layout;
@group(0) @binding(3) var<storage, read> weights_data: array<i32>;
@group(0) @binding(4) var<storage, read> scales_layout: Layout;
@group(0) @binding(5) var<storage, read> scales_data: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= arrayLength(&out_data)) { return; }
    let group_size = out_layout.sizes[out_layout.rank - 1u] / max(arrayLength(&scales_data), 1u);
    let group = i / max(group_size, 1u);
    out_data[i] = f32(weights_data[i]) * scales_data[group];
}
"#;

/// The fixed kernel library: every canonical `<op>_<dtype>` name this crate will ever ask
/// `ferrite-kernel`'s cache to compile, generated up front rather than discovered lazily. This
/// is a closed set, not a declarative DSL — a name not in the table is a programming error in
/// this crate, not a user-supplied shader.
const GT: &str = r#"
struct Layout {
    rank: u32,
    _pad: u32,
    sizes: array<u32, 8>,
    strides: array<u32, 8>,
    offsets: array<u32, 8>,
}

@group(0) @binding(0) var<storage, read> out_layout: Layout;
@group(0) @binding(1) var<storage, read_write> out_data: array<f32>;
@group(0) @binding(2) var<storage, read> in_layout: Layout;
@group(0) @binding(3) var<storage, read> in_data: array<f32>;
@group(0) @binding(4) var<storage, read> threshold_data: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= arrayLength(&out_data)) { return; }
    out_data[i] = select(0.0, 1.0, in_data[i] > threshold_data[0]);
}
"#;

pub struct KernelLibrary {
    sources: HashMap<String, String>,
}

impl Default for KernelLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelLibrary {
    pub fn new() -> Self {
        let mut sources = HashMap::new();
        for &op in OPS {
            let Some(body) = Self::owned_source(op) else { continue };
            for &dtype in DTYPES {
                sources.insert(format!("{op}_{dtype}"), body.clone());
            }
        }
        Self { sources }
    }

    /// Returns owned WGSL source for `op`, since several templates are generated per dtype
    /// rather than stored verbatim.
    fn owned_source(op: &str) -> Option<String> {
        Some(match op {
            "matmul" => MATMUL.to_string(),
            "softmax" => SOFTMAX.to_string(),
            "rmsnorm" => RMSNORM.to_string(),
            "rope" => ROPE.to_string(),
            "embedding" => EMBEDDING.to_string(),
            "roll" => ROLL.to_string(),
            "scatter" => SCATTER.to_string(),
            "gather" => GATHER.to_string(),
            "sort" => SORT.to_string(),
            "cumsum" => CUMSUM.to_string(),
            "sum" => SUM.to_string(),
            "multinomial" => MULTINOMIAL.to_string(),
            "hadamard_broadcast" => HADAMARD_BROADCAST.to_string(),
            "hadamard" => elementwise_binary("*"),
            "add" | "add2" => elementwise_binary("+"),
            "sub" => elementwise_binary("-"),
            "div" => elementwise_binary("/"),
            "scalar_mul" => elementwise_unary("x * in_layout.offsets[0]"),
            "silu" => elementwise_unary("x / (1.0 + exp(-x))"),
            "copy" => elementwise_unary("x"),
            "gt" => GT.to_string(),
            _ => return None,
        })
    }
}

impl KernelSource for KernelLibrary {
    fn source(&self, name: &KernelName) -> Option<&str> {
        self.sources.get(&name.canonical()).map(String::as_str)
    }
}
