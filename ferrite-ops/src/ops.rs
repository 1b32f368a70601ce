//! Host wrappers for the kernel library. Each wrapper normalizes its arguments, computes a
//! dispatch grid, allocates the output (unless the caller supplied one), and returns a future
//! of the result. The numerical kernel bodies live in `shaders`; this module only owns the
//! host-side contract each one is dispatched under.

use std::f32::consts::PI;
use std::sync::Arc;

use rand::Rng;

use ferrite_gpu::Device;
use ferrite_kernel::{Dim3, FutureTensor, KernelTask, ThreadSignal};
use ferrite_tensor::{Dtype, ElementType, TensorView};

use crate::runtime::Runtime;
use crate::{Error, Result};

fn dtype_suffix<T: ElementType>() -> &'static str {
    match T::DTYPE {
        Dtype::F32 => "f32",
        Dtype::F16 => "f16",
        Dtype::BF16 => "bf16",
        Dtype::I32 => "i32",
        Dtype::I8 => "i8",
        Dtype::Bool => "bool",
    }
}

fn dispatch<T: ElementType>(rt: &Runtime, mut task: KernelTask, output: TensorView<T>) -> Result<FutureTensor<T>> {
    let signal = rt.pool().push(&mut task)?;
    Ok(FutureTensor::new(output, signal))
}

fn linear_grid(numel: usize) -> (Dim3, Dim3) {
    let group = Dim3::linear(64u32.min(numel.max(1) as u32));
    (Dim3::linear(numel as u32), group)
}

/// Elementwise binary op over two identically-shaped tensors: `hadamard`, `add`, `sub`, `div`.
fn elementwise_binary<T: ElementType>(rt: &Runtime, op: &str, lhs: &TensorView<T>, rhs: &TensorView<T>) -> Result<FutureTensor<T>> {
    if lhs.numel() != rhs.numel() || lhs.sizes().last() != rhs.sizes().last() {
        return Err(Error::ShapeMismatch(format!(
            "{op}: shapes {:?} and {:?} do not match",
            lhs.sizes(),
            rhs.sizes()
        )));
    }
    let output = rt.alloc_output::<T>(lhs.sizes().to_vec())?;
    let (grid, group) = linear_grid(lhs.numel());
    let name = format!("{op}_{}", dtype_suffix::<T>());
    let device = rt.device();
    let task = KernelTask::new(&name, grid, group)?
        .bind_front(device, &output)?
        .bind_back(device, lhs)?
        .bind_back(device, rhs)?;
    dispatch(rt, task, output)
}

pub fn hadamard<T: ElementType>(rt: &Runtime, lhs: &TensorView<T>, rhs: &TensorView<T>) -> Result<FutureTensor<T>> {
    elementwise_binary(rt, "hadamard", lhs, rhs)
}

pub fn add<T: ElementType>(rt: &Runtime, lhs: &TensorView<T>, rhs: &TensorView<T>) -> Result<FutureTensor<T>> {
    elementwise_binary(rt, "add", lhs, rhs)
}

pub fn sub<T: ElementType>(rt: &Runtime, lhs: &TensorView<T>, rhs: &TensorView<T>) -> Result<FutureTensor<T>> {
    elementwise_binary(rt, "sub", lhs, rhs)
}

pub fn div<T: ElementType>(rt: &Runtime, lhs: &TensorView<T>, rhs: &TensorView<T>) -> Result<FutureTensor<T>> {
    elementwise_binary(rt, "div", lhs, rhs)
}

/// Row-broadcast add: `lhs` is `(..,D)`, `bias` is `(D,)`, broadcast over every leading dim.
/// Used for the output projection's bias-free path as well as any future bias-carrying linear.
pub fn add2<T: ElementType>(rt: &Runtime, lhs: &TensorView<T>, bias: &TensorView<T>) -> Result<FutureTensor<T>> {
    let dim = *lhs.sizes().last().unwrap_or(&0);
    if bias.numel() != dim {
        return Err(Error::ShapeMismatch(format!("add2: bias of {} elements does not match last dim {dim}", bias.numel())));
    }
    let output = rt.alloc_output::<T>(lhs.sizes().to_vec())?;
    let (grid, group) = linear_grid(lhs.numel());
    let name = format!("add2_{}", dtype_suffix::<T>());
    let device = rt.device();
    let task = KernelTask::new(&name, grid, group)?
        .bind_front(device, &output)?
        .bind_back(device, lhs)?
        .bind_back(device, bias)?;
    dispatch(rt, task, output)
}

pub fn scalar_mul<T: ElementType>(rt: &Runtime, input: &TensorView<T>, scalar: T) -> Result<FutureTensor<T>> {
    let output = rt.alloc_output::<T>(input.sizes().to_vec())?;
    let (grid, group) = linear_grid(input.numel());
    let name = format!("scalar_mul_{}", dtype_suffix::<T>());
    let device = rt.device();
    let task = KernelTask::new(&name, grid, group)?
        .bind_front(device, &output)?
        .bind_back(device, input)?
        .bind_scalar(device, scalar);
    dispatch(rt, task, output)
}

/// Dequantizes per-group int8 weights by per-group float scales: `scales (D0,D1,1) x weights
/// (D0,D1,G) -> (D0,D1,G)`.
pub fn hadamard_broadcast<T: ElementType>(rt: &Runtime, scales: &TensorView<f32>, weights: &TensorView<i8>) -> Result<FutureTensor<T>> {
    if scales.sizes()[..scales.rank() - 1] != weights.sizes()[..weights.rank() - 1] {
        return Err(Error::ShapeMismatch("hadamard_broadcast: leading dims of scales and weights must match".into()));
    }
    let output = rt.alloc_output::<T>(weights.sizes().to_vec())?;
    let (grid, group) = linear_grid(weights.numel());
    let name = format!("hadamard_broadcast_{}", dtype_suffix::<T>());
    let device = rt.device();
    let task = KernelTask::new(&name, grid, group)?
        .bind_front(device, &output)?
        .bind_back(device, weights)?
        .bind_back(device, scales)?;
    dispatch(rt, task, output)
}

fn rows_and_last_dim<T: ElementType>(view: &TensorView<T>) -> (usize, usize) {
    let last = *view.sizes().last().unwrap_or(&1);
    (view.numel() / last.max(1), last)
}

pub fn softmax(rt: &Runtime, input: &TensorView<f32>) -> Result<FutureTensor<f32>> {
    let (rows, _) = rows_and_last_dim(input);
    let output = rt.alloc_output::<f32>(input.sizes().to_vec())?;
    let device = rt.device();
    let task = KernelTask::new("softmax_f32", Dim3::linear(rows as u32), Dim3::linear(1))?
        .bind_front(device, &output)?
        .bind_back(device, input)?;
    dispatch(rt, task, output)
}

pub fn silu(rt: &Runtime, input: &TensorView<f32>) -> Result<FutureTensor<f32>> {
    let output = rt.alloc_output::<f32>(input.sizes().to_vec())?;
    let (grid, group) = linear_grid(input.numel());
    let device = rt.device();
    let task = KernelTask::new("silu_f32", grid, group)?.bind_front(device, &output)?.bind_back(device, input)?;
    dispatch(rt, task, output)
}

pub fn copy<T: ElementType>(rt: &Runtime, input: &TensorView<T>) -> Result<FutureTensor<T>> {
    let output = rt.alloc_output::<T>(input.sizes().to_vec())?;
    copy_into(rt, output, input)
}

/// Copies `input`'s elements into the (possibly narrowed) `dst` view in place. `dst`'s numel
/// must match `input`'s once both are flattened to rank two, matching the sink cache's use of
/// this to write the verbatim prefix into a freshly rolled buffer.
pub fn copy_into<T: ElementType>(rt: &Runtime, dst: TensorView<T>, input: &TensorView<T>) -> Result<FutureTensor<T>> {
    if dst.numel() != input.numel() {
        return Err(Error::ShapeMismatch(format!(
            "copy: destination has {} elements, source has {}",
            dst.numel(),
            input.numel()
        )));
    }
    let (grid, group) = linear_grid(input.numel());
    let name = format!("copy_{}", dtype_suffix::<T>());
    let device = rt.device();
    let task = KernelTask::new(&name, grid, group)?
        .bind_front(device, &dst)?
        .bind_back(device, input)?;
    dispatch(rt, task, dst)
}

pub fn rmsnorm(rt: &Runtime, input: &TensorView<f32>, weight: &TensorView<f32>, eps: f32) -> Result<FutureTensor<f32>> {
    let (rows, dim) = rows_and_last_dim(input);
    if weight.numel() != dim {
        return Err(Error::ShapeMismatch(format!("rmsnorm: weight has {} elements, expected {dim}", weight.numel())));
    }
    let output = rt.alloc_output::<f32>(input.sizes().to_vec())?;
    let device = rt.device();
    let task = KernelTask::new("rmsnorm_f32", Dim3::linear(rows as u32), Dim3::linear(1))?
        .bind_front(device, &output)?
        .bind_back(device, input)?
        .bind_back(device, weight)?
        .bind_scalar(device, eps);
    dispatch(rt, task, output)
}

/// Applies rotary pair rotation to `input (B,L,H,D)` using precomputed `cos`/`sin`
/// `(max_seq_len, D/2)` tables, reading the slice starting at `start_pos`.
pub fn rope(rt: &Runtime, input: &TensorView<f32>, cos: &TensorView<f32>, sin: &TensorView<f32>, start_pos: u32) -> Result<FutureTensor<f32>> {
    let head_dim = *input.sizes().last().ok_or_else(|| Error::ShapeMismatch("rope: input must be rank >= 1".into()))?;
    let half_dim = head_dim / 2;
    let positions = input.numel() / head_dim;
    let output = rt.alloc_output::<f32>(input.sizes().to_vec())?;
    let device = rt.device();
    let grid = Dim3::new(half_dim as u32, positions as u32, 1);
    let group = Dim3::new(64u32.min(half_dim.max(1) as u32), 1, 1);
    let task = KernelTask::new("rope_f32", grid, group)?
        .bind_front(device, &output)?
        .bind_back(device, input)?
        .bind_back(device, cos)?
        .bind_back(device, sin)?
        .bind_scalar(device, start_pos);
    dispatch(rt, task, output)
}

const LOW_FREQ_FACTOR: f32 = 1.0;
const HIGH_FREQ_FACTOR: f32 = 4.0;
const OLD_CONTEXT_LEN: f32 = 8192.0;
const SCALE_FACTOR: f32 = 32.0;

/// Rescales a base RoPE frequency per the llama3 wavelength-piecewise schedule: frequencies
/// whose wavelength is short relative to the model's original training context pass through
/// unchanged, long-wavelength ones are divided by `SCALE_FACTOR`, and the band between is
/// smoothly interpolated.
fn llama3_rescale(freq: f32) -> f32 {
    let low_freq_wavelen = OLD_CONTEXT_LEN / LOW_FREQ_FACTOR;
    let high_freq_wavelen = OLD_CONTEXT_LEN / HIGH_FREQ_FACTOR;
    let wavelen = 2.0 * PI / freq;
    if wavelen < high_freq_wavelen {
        freq
    } else if wavelen > low_freq_wavelen {
        freq / SCALE_FACTOR
    } else {
        let smooth = (OLD_CONTEXT_LEN / wavelen - LOW_FREQ_FACTOR) / (HIGH_FREQ_FACTOR - LOW_FREQ_FACTOR);
        (1.0 - smooth) * freq / SCALE_FACTOR + smooth * freq
    }
}

/// Computes `cos`/`sin` tables for positions `[start_pos, start_pos+seq_len)` over `dim`
/// rotary pairs. Cheap enough (`O(seq_len * dim)` floats) that it's computed on the host and
/// uploaded directly, rather than dispatched as a kernel — the resulting future is already
/// resolved.
pub fn rope_freqs(rt: &Runtime, dim: usize, start_pos: usize, seq_len: usize, theta: f32, use_llama3_rescale: bool) -> Result<(FutureTensor<f32>, FutureTensor<f32>)> {
    let half_dim = dim / 2;
    let mut cos = vec![0f32; seq_len * half_dim];
    let mut sin = vec![0f32; seq_len * half_dim];
    for i in 0..half_dim {
        let mut freq = 1.0 / theta.powf(2.0 * i as f32 / dim as f32);
        if use_llama3_rescale {
            freq = llama3_rescale(freq);
        }
        for (row, pos) in (start_pos..start_pos + seq_len).enumerate() {
            let angle = pos as f32 * freq;
            cos[row * half_dim + i] = angle.cos();
            sin[row * half_dim + i] = angle.sin();
        }
    }
    let upload = |values: Vec<f32>| -> Result<FutureTensor<f32>> {
        let storage = rt.allocator().allocate_from(bytemuck::cast_slice(&values))?;
        let view = TensorView::new(vec![seq_len, half_dim], Arc::new(storage))?;
        Ok(FutureTensor::new(view, ThreadSignal::ready()))
    };
    Ok((upload(cos)?, upload(sin)?))
}

/// Sets every element selected by `mask` to `value`.
pub fn scatter(rt: &Runtime, input: &TensorView<f32>, mask: &TensorView<f32>, value: f32) -> Result<FutureTensor<f32>> {
    if input.numel() != mask.numel() {
        return Err(Error::ShapeMismatch("scatter: input and mask must share element count".into()));
    }
    let output = rt.alloc_output::<f32>(input.sizes().to_vec())?;
    let (grid, group) = linear_grid(input.numel());
    let device = rt.device();
    let task = KernelTask::new("scatter_f32", grid, group)?
        .bind_front(device, &output)?
        .bind_back(device, mask)?
        .bind_back(device, input)?
        .bind_scalar(device, value);
    dispatch(rt, task, output)
}

/// `gt(input, threshold)`: elementwise comparison producing a `1.0`/`0.0` mask.
pub fn greater_than(rt: &Runtime, input: &TensorView<f32>, threshold: f32) -> Result<FutureTensor<f32>> {
    let output = rt.alloc_output::<f32>(input.sizes().to_vec())?;
    let (grid, group) = linear_grid(input.numel());
    let device = rt.device();
    let task = KernelTask::new("gt_f32", grid, group)?
        .bind_front(device, &output)?
        .bind_back(device, input)?
        .bind_scalar(device, threshold);
    dispatch(rt, task, output)
}

/// `gather(values (B,K), indices (B,J)) -> (B,J)`.
pub fn gather(rt: &Runtime, values: &TensorView<f32>, indices: &TensorView<i32>) -> Result<FutureTensor<f32>> {
    let output = rt.alloc_output::<f32>(indices.sizes().to_vec())?;
    let (grid, group) = linear_grid(indices.numel());
    let device = rt.device();
    let task = KernelTask::new("gather_f32", grid, group)?
        .bind_front(device, &output)?
        .bind_back(device, values)?
        .bind_back(device, indices)?;
    dispatch(rt, task, output)
}

/// Cyclically shifts `input` along `dim` by `shift` positions (negative shifts normalize to a
/// positive equivalent modulo that dimension's size). Each group of leading-dim indices rolls
/// independently — the `(bs, L, H, D)` sink-cache roll only ever moves the `L` axis, leaving
/// the batch axis untouched.
pub fn roll<T: ElementType>(rt: &Runtime, input: &TensorView<T>, shift: i64, dim: usize) -> Result<FutureTensor<T>> {
    if dim >= input.rank() {
        return Err(Error::ShapeMismatch(format!("roll: dim {dim} out of range for rank {}", input.rank())));
    }
    let dim_size = input.sizes()[dim] as i64;
    let inner: usize = input.sizes()[dim + 1..].iter().product();
    let normalized = shift.rem_euclid(dim_size.max(1)) as u32;
    let output = rt.alloc_output::<T>(input.sizes().to_vec())?;
    let (grid, group) = linear_grid(input.numel());
    let name = format!("roll_{}", dtype_suffix::<T>());
    let device = rt.device();
    let task = KernelTask::new(&name, grid, group)?
        .bind_front(device, &output)?
        .bind_back(device, input)?
        .bind_scalar(device, normalized)
        .bind_scalar(device, dim_size as u32)
        .bind_scalar(device, inner as u32);
    dispatch(rt, task, output)
}

/// Sorts the last dimension in descending order, returning `(values, indices)`.
pub fn sort(rt: &Runtime, input: &TensorView<f32>) -> Result<(FutureTensor<f32>, FutureTensor<i32>)> {
    let (rows, dim) = rows_and_last_dim(input);
    let padded_dim = dim.next_power_of_two();
    let values = rt.alloc_output::<f32>(input.sizes().to_vec())?;
    let mut index_sizes = input.sizes().to_vec();
    *index_sizes.last_mut().unwrap() = dim;
    let indices = rt.alloc_output::<i32>(index_sizes)?;
    let device = rt.device();
    let mut task = KernelTask::new("sort_f32", Dim3::linear(rows as u32), Dim3::linear(1))?;
    task = task.bind_front(device, &indices)?;
    task = task.bind_front(device, &values)?;
    task = task.bind_back(device, input)?;
    task = task.bind_scalar(device, padded_dim as u32);
    let signal = rt.pool().push(&mut task)?;
    Ok((FutureTensor::new(values, signal.clone()), FutureTensor::new(indices, signal)))
}

/// Inclusive cumulative sum along the last dimension.
pub fn cumsum(rt: &Runtime, input: &TensorView<f32>) -> Result<FutureTensor<f32>> {
    let (rows, _) = rows_and_last_dim(input);
    let output = rt.alloc_output::<f32>(input.sizes().to_vec())?;
    let device = rt.device();
    let task = KernelTask::new("cumsum_f32", Dim3::linear(rows as u32), Dim3::linear(1))?
        .bind_front(device, &output)?
        .bind_back(device, input)?;
    dispatch(rt, task, output)
}

/// Sums along the last dimension, dropping it.
pub fn sum(rt: &Runtime, input: &TensorView<f32>) -> Result<FutureTensor<f32>> {
    let (rows, _) = rows_and_last_dim(input);
    let mut sizes = input.sizes().to_vec();
    sizes.pop();
    if sizes.is_empty() {
        sizes.push(1);
    }
    let output = rt.alloc_output::<f32>(sizes)?;
    let device = rt.device();
    let task = KernelTask::new("sum_f32", Dim3::linear(rows as u32), Dim3::linear(1))?
        .bind_front(device, &output)?
        .bind_back(device, input)?;
    dispatch(rt, task, output)
}

/// Draws `num_samples` indices per row from `probs (..,D)`, expected in descending order (the
/// nucleus sampler's convention after `sort`). Uniform draws are generated on the host since
/// wgpu's compute surface has no portable RNG primitive, then uploaded alongside the dispatch.
pub fn multinomial(rt: &Runtime, probs: &TensorView<f32>, num_samples: usize) -> Result<FutureTensor<i32>> {
    let (rows, _) = rows_and_last_dim(probs);
    let mut rng = rand::thread_rng();
    let uniforms: Vec<f32> = (0..rows * num_samples).map(|_| rng.gen::<f32>()).collect();
    let uniform_storage = rt.allocator().allocate_from(bytemuck::cast_slice(&uniforms))?;
    let uniform_view = TensorView::<f32>::new(vec![rows, num_samples], Arc::new(uniform_storage))?;
    let mut sizes = probs.sizes()[..probs.rank() - 1].to_vec();
    sizes.push(num_samples);
    let output = rt.alloc_output::<i32>(sizes)?;
    let device = rt.device();
    let task = KernelTask::new("multinomial_f32", Dim3::linear(rows as u32), Dim3::linear(1))?
        .bind_front(device, &output)?
        .bind_back(device, probs)?
        .bind_back(device, &uniform_view)?;
    dispatch(rt, task, output)
}

/// `embedding(ids (B,L), weight (V,E)) -> (B,L,E)`. The shader performs no bounds check; the
/// caller must guarantee every id is `< V`.
pub fn embedding(rt: &Runtime, ids: &TensorView<i32>, weight: &TensorView<f32>) -> Result<FutureTensor<f32>> {
    let dim = *weight.sizes().last().ok_or_else(|| Error::ShapeMismatch("embedding: weight must be rank >= 1".into()))?;
    let mut sizes = ids.sizes().to_vec();
    sizes.push(dim);
    let output = rt.alloc_output::<f32>(sizes)?;
    let device = rt.device();
    let grid = Dim3::new(dim as u32, ids.numel() as u32, 1);
    let group = Dim3::new(64u32.min(dim.max(1) as u32), 1, 1);
    let task = KernelTask::new("embedding_f32", grid, group)?
        .bind_front(device, &output)?
        .bind_back(device, weight)?
        .bind_back(device, ids)?;
    dispatch(rt, task, output)
}

/// `matmul((B,M,K), (B,K,N)) -> (B,M,N)`, broadcasting a rank-2 `rhs (K,N)` over every batch.
/// Dispatches one kernel per batch slice into a shared output tensor, since the shader itself
/// only ever handles a single 2D product.
pub fn matmul(rt: &Runtime, lhs: &TensorView<f32>, rhs: &TensorView<f32>) -> Result<FutureTensor<f32>> {
    let (lhs3, restore) = to_rank3(lhs)?;
    let batch = lhs3.sizes()[0];
    let m = lhs3.sizes()[1];
    let k = lhs3.sizes()[2];
    let (n, rhs_batched) = match rhs.rank() {
        2 => (rhs.sizes()[1], false),
        3 => (rhs.sizes()[2], true),
        r => return Err(Error::ShapeMismatch(format!("matmul: rhs rank {r} unsupported"))),
    };
    if rhs.sizes()[rhs.rank() - 2] != k {
        return Err(Error::ShapeMismatch(format!("matmul: lhs K={k} does not match rhs K={}", rhs.sizes()[rhs.rank() - 2])));
    }
    let output = rt.alloc_output::<f32>(vec![batch, m, n])?;
    let device = rt.device();
    let group = Dim3::new(8, 8, 1);
    let mut signal = None;
    for b in 0..batch {
        let lhs_slice = lhs3.narrow(0, b, 1)?.view(&[m as isize, k as isize])?;
        let rhs_slice = if rhs_batched {
            rhs.narrow(0, b, 1)?.view(&[k as isize, n as isize])?
        } else {
            rhs.clone()
        };
        let out_slice = output.narrow(0, b, 1)?.view(&[m as isize, n as isize])?;
        let grid = Dim3::new(n as u32, m as u32, 1);
        let mut task = KernelTask::new("matmul_f32", grid, group)?;
        task = task.bind_front(device, &out_slice)?;
        task = task.bind_back(device, &lhs_slice)?;
        task = task.bind_back(device, &rhs_slice)?;
        signal = Some(rt.pool().push(&mut task)?);
    }
    let signal = signal.ok_or_else(|| Error::ShapeMismatch("matmul: batch dimension must be non-zero".into()))?;
    let restored = restore_batch_shape(&output, &restore, n)?;
    Ok(FutureTensor::new(restored, signal))
}

/// Reshapes a `(batch, m, n)` matmul output back through the leading-dim shape `to_rank3`
/// collapsed away, so a rank>3 `lhs` yields a matching rank>3 result instead of a flattened one.
fn restore_batch_shape(output: &TensorView<f32>, original_lhs_sizes: &[usize], n: usize) -> Result<TensorView<f32>> {
    let mut shape: Vec<isize> = original_lhs_sizes[..original_lhs_sizes.len() - 1].iter().map(|&d| d as isize).collect();
    shape.push(n as isize);
    Ok(output.view(&shape)?)
}

fn to_rank3(view: &TensorView<f32>) -> Result<(TensorView<f32>, Vec<usize>)> {
    let original = view.sizes().to_vec();
    match view.rank() {
        3 => Ok((view.clone(), original)),
        2 => {
            let sizes = view.sizes();
            Ok((view.view(&[1, sizes[0] as isize, sizes[1] as isize])?, original))
        }
        r if r > 3 => {
            let sizes = view.sizes();
            let batch: usize = sizes[..r - 2].iter().product();
            let m = sizes[r - 2];
            let k = sizes[r - 1];
            Ok((view.view(&[batch as isize, m as isize, k as isize])?, original))
        }
        r => Err(Error::ShapeMismatch(format!("matmul: lhs rank {r} unsupported"))),
    }
}

/// The default nucleus (top-p) sampler, composed from the primitive kernels:
/// `scalar_mul -> softmax -> sort -> cumsum -> sub -> gt -> scatter -> multinomial -> gather`.
pub fn nucleus_sample(rt: &Runtime, logits: &TensorView<f32>, temperature: f32, top_p: f32) -> Result<FutureTensor<i32>> {
    let device = rt.device();
    let scaled = scalar_mul(rt, logits, 1.0 / temperature.max(1e-6))?;
    let probs = softmax(rt, scaled.get(device))?;
    let (sorted, indices) = sort(rt, probs.get(device))?;
    let cumulative = cumsum(rt, sorted.get(device))?;
    let shifted = sub(rt, cumulative.get(device), sorted.get(device))?;
    let mask = greater_than(rt, shifted.get(device), top_p)?;
    let pruned = scatter(rt, sorted.get(device), mask.get(device), 0.0)?;
    let samples = multinomial(rt, pruned.get(device), 1)?;
    gather_indices(rt, indices.get(device), samples.get(device))
}

/// `gather`'s int32-valued sibling: selects sampled token ids out of the sort permutation.
fn gather_indices(rt: &Runtime, values: &TensorView<i32>, indices: &TensorView<i32>) -> Result<FutureTensor<i32>> {
    let output = rt.alloc_output::<i32>(indices.sizes().to_vec())?;
    let (grid, group) = linear_grid(indices.numel());
    let device = rt.device();
    let task = KernelTask::new("gather_i32", grid, group)?
        .bind_front(device, &output)?
        .bind_back(device, values)?
        .bind_back(device, indices)?;
    dispatch(rt, task, output)
}

/// Builds a CPU-resident, GPU-uploaded storage directly from typed values, for scratch tensors
/// assembled by a kernel wrapper rather than produced by another kernel (e.g. `multinomial`'s
/// uniform draws).
#[allow(dead_code)]
pub(crate) fn upload<T: ElementType>(rt: &Runtime, sizes: Vec<usize>, values: &[T]) -> Result<TensorView<T>> {
    let storage = rt.allocator().allocate_from(bytemuck::cast_slice(values))?;
    Ok(TensorView::new(sizes, Arc::new(storage))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_gpu::Accelerator;
    use pretty_assertions::assert_eq;

    async fn runtime() -> Runtime {
        let device = Accelerator::default_device().await.expect("no compatible GPU adapter for test");
        Runtime::new(Arc::new(device))
    }

    #[test]
    fn llama3_rescale_passes_short_wavelengths_through() {
        let high_freq = 1.0;
        assert_eq!(llama3_rescale(high_freq), high_freq);
    }

    #[test]
    fn llama3_rescale_divides_long_wavelengths() {
        let low_freq = 1e-5;
        let rescaled = llama3_rescale(low_freq);
        assert!((rescaled - low_freq / SCALE_FACTOR).abs() < 1e-9);
    }

    #[test]
    fn to_rank3_collapses_leading_dims() {
        let storage = Arc::new(ferrite_tensor::Storage::random(2 * 3 * 4 * 5 * 4));
        let t = TensorView::<f32>::new(vec![2, 3, 4, 5], storage).unwrap();
        let (collapsed, original) = to_rank3(&t).unwrap();
        assert_eq!(collapsed.sizes(), &[6, 4, 5]);
        assert_eq!(original, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn rmsnorm_scales_unit_row_by_weight() {
        let rt = runtime().await;
        let device = rt.device();
        let x = upload(&rt, vec![1, 4], &[3.0f32, 3.0, 3.0, 3.0]).unwrap();
        let w = upload(&rt, vec![4], &[1.0f32, 1.0, 1.0, 1.0]).unwrap();
        let out = rmsnorm(&rt, &x, &w, 1e-5).unwrap();
        rt.flush();
        let values = out.retrieve(device).await.unwrap();
        for v in values {
            assert!((v - 1.0).abs() < 1e-3);
        }
    }

    #[tokio::test]
    async fn roll_then_inverse_roll_is_identity() {
        let rt = runtime().await;
        let device = rt.device();
        let data: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let x = upload(&rt, vec![1, 16], &data).unwrap();
        let rolled = roll(&rt, &x, 3, 1).unwrap();
        rt.flush();
        let rolled_view = rolled.get(device).clone();
        let back = roll(&rt, &rolled_view, -3, 1).unwrap();
        rt.flush();
        let restored = back.retrieve(device).await.unwrap();
        assert_eq!(restored, data);
    }

    #[tokio::test]
    async fn roll_on_a_non_trailing_dim_shifts_whole_rows() {
        // Shape (2, 3, 2): rolling dim 1 must move each (row_len=2) row as a unit, not the
        // flat element index — this is exactly the sink-cache eviction shape, (bs, L, inner).
        let rt = runtime().await;
        let device = rt.device();
        let data: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let x = upload(&rt, vec![2, 3, 2], &data).unwrap();
        let rolled = roll(&rt, &x, 1, 1).unwrap();
        rt.flush();
        let values = rolled.retrieve(device).await.unwrap();
        assert_eq!(values, vec![2.0, 3.0, 4.0, 5.0, 0.0, 1.0, 8.0, 9.0, 10.0, 11.0, 6.0, 7.0]);
    }

    #[tokio::test]
    async fn matmul_restores_rank_above_three() {
        let rt = runtime().await;
        let device = rt.device();
        // lhs (2, 2, 1, 2) @ rhs (2, 2) -> expected shape (2, 2, 1, 2), not the (4, 1, 2) the
        // flattened batch would otherwise leave it as.
        let lhs = upload(&rt, vec![2, 2, 1, 2], &[1.0f32, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0]).unwrap();
        let rhs = upload(&rt, vec![2, 2], &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let out = matmul(&rt, &lhs, &rhs).unwrap();
        rt.flush();
        let result = out.get(device);
        assert_eq!(result.sizes(), &[2, 2, 1, 2]);
        let values = out.retrieve(device).await.unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 4.0, 6.0, 8.0, 12.0]);
    }

    #[tokio::test]
    async fn softmax_rows_sum_to_one() {
        let rt = runtime().await;
        let device = rt.device();
        let x = upload(&rt, vec![2, 4], &[1.0f32, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        let out = softmax(&rt, &x).unwrap();
        rt.flush();
        let values = out.retrieve(device).await.unwrap();
        for row in values.chunks(4) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
        }
    }
}
