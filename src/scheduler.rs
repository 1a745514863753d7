// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/scheduler.rs - 单帧调度：分层管线、超时回退与队列降级
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  bom::{BomError, BomState},
  frame::{Frame, FrameError},
  matrix::{CostMatrix, SPARSITY_THRESHOLD},
  merge::{Assignment, BomMerger, Proposal, Rejection},
  prefilter::{Pair, Prefilter},
  score::{FrameScorer, Scorer},
  solver::{
    AssignmentMethod, CONFIRMATION_THRESHOLD, HungarianSolver, Solver, SolverError, confirms,
    greedy_assign,
  },
  stats::AlgorithmStats,
  suppression::{CentroidSuppression, SuppressedPair, SuppressionPolicy},
  tier::{HeldPair, HoldReason, Tier, TierRouter},
};

pub const DEFAULT_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Error, Debug)]
pub enum SchedulerError {
  #[error("输入帧无效: {0}")]
  Frame(#[from] FrameError),
  #[error("{0}")]
  Bom(#[from] BomError),
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("配置项 {key} 的值无效: {value}")]
  InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
  pub timeout: Duration,
  pub max_queue_depth: usize,
  pub batch_size: usize,
  pub prefilter: Prefilter,
  pub router: TierRouter,
  pub confirmation_threshold: f32,
  pub sparsity_threshold: f32,
  pub suppression: SuppressionPolicy,
}

impl Default for SchedulerOptions {
  fn default() -> Self {
    Self {
      timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
      max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
      batch_size: DEFAULT_BATCH_SIZE,
      prefilter: Prefilter::default(),
      router: TierRouter::default(),
      confirmation_threshold: CONFIRMATION_THRESHOLD,
      sparsity_threshold: SPARSITY_THRESHOLD,
      suppression: SuppressionPolicy::default(),
    }
  }
}

impl SchedulerOptions {
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_max_queue_depth(mut self, max_queue_depth: usize) -> Self {
    self.max_queue_depth = max_queue_depth;
    self
  }

  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size.max(1);
    self
  }

  pub fn with_suppression(mut self, suppression: SuppressionPolicy) -> Self {
    self.suppression = suppression;
    self
  }
}

impl FromUrlWithScheme for SchedulerOptions {
  const SCHEME: &'static str = "brickmatch";
}

impl FromUrl for SchedulerOptions {
  type Error = ConfigError;

  /// 例如 `brickmatch://?timeout_ms=500&max_queue_depth=10&batch_size=100`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch);
    }

    let mut options = SchedulerOptions::default();
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "timeout_ms" => options.timeout = Duration::from_millis(parse(&key, &value)?),
        "max_queue_depth" => options.max_queue_depth = parse(&key, &value)?,
        "batch_size" => options = options.with_batch_size(parse(&key, &value)?),
        "prefilter_threshold" => options.prefilter.threshold = parse(&key, &value)?,
        "top_k" => options.prefilter.top_k = parse(&key, &value)?,
        "high" => options.router.high = parse(&key, &value)?,
        "medium" => options.router.medium = parse(&key, &value)?,
        "min_margin" => options.router.min_margin = parse(&key, &value)?,
        "confirmation" => options.confirmation_threshold = parse(&key, &value)?,
        "sparsity" => options.sparsity_threshold = parse(&key, &value)?,
        "suppression" => options.suppression = parse_suppression(&value)?,
        _ => warn!("忽略未知配置项: {}={}", key, value),
      }
    }
    Ok(options)
  }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.parse().map_err(|_| ConfigError::InvalidValue {
    key: key.to_string(),
    value: value.to_string(),
  })
}

/// `exclude` 或 `penalize:<factor>`
fn parse_suppression(value: &str) -> Result<SuppressionPolicy, ConfigError> {
  match value.split_once(':') {
    None if value == "exclude" => Ok(SuppressionPolicy::Exclude),
    Some(("penalize", factor)) => Ok(SuppressionPolicy::Penalize {
      factor: parse("suppression", factor)?,
    }),
    _ => Err(ConfigError::InvalidValue {
      key: "suppression".to_string(),
      value: value.to_string(),
    }),
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingPath {
  Tiered,
  /// 队列积压超过上限时的同步降级路径
  SyncFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
  Timeout,
  SolverFailure,
}

/// 一个中置信度子批次的处理记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
  pub pairs: usize,
  pub density: f32,
  pub compressed: bool,
  pub method: AssignmentMethod,
  pub fallback: Option<FallbackReason>,
  pub matched: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameOutput {
  pub assignments: Vec<Assignment>,
  pub hold_queue: Vec<HeldPair>,
  pub suppressed: Vec<SuppressedPair>,
  /// 参与分配但最终没有任何结果的检测所对应的对
  pub unresolved: Vec<Pair>,
  pub rejected: Vec<Rejection>,
  pub bom_state: BomState,
  pub path: ProcessingPath,
  pub batches: Vec<BatchReport>,
  pub stats: AlgorithmStats,
}

#[derive(Default)]
struct Staged {
  proposals: Vec<Proposal>,
  hold_queue: Vec<HeldPair>,
  suppressed: Vec<SuppressedPair>,
  contested: Vec<Pair>,
  batches: Vec<BatchReport>,
  used_detections: HashSet<usize>,
  used_candidates: HashSet<usize>,
  /// 最佳对因裕度不足转入复核的检测，本帧不再自动分配
  deferred: HashSet<usize>,
}

impl Staged {
  fn hold(&mut self, frame: &Frame, pairs: Vec<Pair>, reason: HoldReason) {
    self
      .hold_queue
      .extend(pairs.into_iter().map(|pair| HeldPair::new(frame, pair, reason)));
  }

  fn propose(&mut self, frame: &Frame, pairs: &[Pair], tier: Tier, method: AssignmentMethod) {
    self.proposals.extend(pairs.iter().map(|p| {
      Proposal::new(
        frame,
        p.detection_index,
        p.candidate_index,
        p.similarity,
        tier,
        method,
      )
    }));
  }

  /// 把已转入复核的检测的其余对一并放入待审队列，返回剩下的对
  fn withhold(&mut self, frame: &Frame, pairs: Vec<Pair>) -> Vec<Pair> {
    let (held, rest): (Vec<Pair>, Vec<Pair>) = pairs
      .into_iter()
      .partition(|p| self.deferred.contains(&p.detection_index));
    self.hold(frame, held, HoldReason::AmbiguousMargin);
    rest
  }

  fn is_free(&self, pair: &Pair) -> bool {
    !self.used_detections.contains(&pair.detection_index)
      && !self.used_candidates.contains(&pair.candidate_index)
  }
}

/// 帧调度器：入口、回退策略与统计的持有者。
///
/// 同一份 BOM 只能有一个写者；跨帧时调用方把上一帧输出的 `bom_state`
/// 作为下一帧的输入。统计按实例保存，不跨实例共享。
pub struct FrameScheduler<S = HungarianSolver, R = FrameScorer> {
  options: SchedulerOptions,
  solver: S,
  scorer: R,
  stats: AlgorithmStats,
  backlog: VecDeque<Frame>,
}

impl FrameScheduler {
  pub fn new(options: SchedulerOptions) -> Self {
    Self {
      options,
      solver: HungarianSolver,
      scorer: FrameScorer,
      stats: AlgorithmStats::default(),
      backlog: VecDeque::new(),
    }
  }
}

impl Default for FrameScheduler {
  fn default() -> Self {
    Self::new(SchedulerOptions::default())
  }
}

impl<S: Solver, R: Scorer> FrameScheduler<S, R> {
  pub fn with_solver<T: Solver>(self, solver: T) -> FrameScheduler<T, R> {
    FrameScheduler {
      options: self.options,
      solver,
      scorer: self.scorer,
      stats: self.stats,
      backlog: self.backlog,
    }
  }

  pub fn with_scorer<T: Scorer>(self, scorer: T) -> FrameScheduler<S, T> {
    FrameScheduler {
      options: self.options,
      solver: self.solver,
      scorer,
      stats: self.stats,
      backlog: self.backlog,
    }
  }

  pub fn options(&self) -> &SchedulerOptions {
    &self.options
  }

  pub fn stats(&self) -> AlgorithmStats {
    self.stats
  }

  pub fn reset_stats(&mut self) {
    self.stats.reset();
  }

  /// 已提交但尚未处理的帧数
  pub fn queue_depth(&self) -> usize {
    self.backlog.len()
  }

  pub fn submit(&mut self, frame: Frame) {
    self.backlog.push_back(frame);
  }

  /// 取出最早提交的一帧并处理；积压为空时返回 `None`
  pub fn process_next(&mut self, bom: &BomState) -> Option<Result<FrameOutput, SchedulerError>> {
    let frame = self.backlog.pop_front()?;
    Some(self.process_frame(&frame, bom))
  }

  /// 处理一帧。输入无效或账本不变量被破坏时报错，此时 BOM 不变。
  pub fn process_frame(
    &mut self,
    frame: &Frame,
    bom: &BomState,
  ) -> Result<FrameOutput, SchedulerError> {
    frame.validate()?;
    BomMerger::post_check(bom)?;

    let depth = self.queue_depth();
    let (path, mut staged) = if depth > self.options.max_queue_depth {
      warn!(
        "队列积压 {} 超过上限 {}，走同步降级路径",
        depth, self.options.max_queue_depth
      );
      self.stats.queue_overflows += 1;
      (ProcessingPath::SyncFallback, self.run_sync(frame))
    } else {
      (ProcessingPath::Tiered, self.run_tiered(frame))
    };

    let proposals = std::mem::take(&mut staged.proposals);
    let outcome = BomMerger.merge(bom, proposals)?;

    self.stats.record_assignments(&outcome.assignments);
    self.stats.frames_processed += 1;

    let unresolved: Vec<Pair> = staged
      .contested
      .into_iter()
      .filter(|p| !staged.used_detections.contains(&p.detection_index))
      .collect();

    info!(
      "帧处理完成: {} 个检测, 分配 {}, 待审 {}, 抑制 {}, 未决 {}, 拒绝 {}",
      frame.detections.len(),
      outcome.assignments.len(),
      staged.hold_queue.len(),
      staged.suppressed.len(),
      unresolved.len(),
      outcome.rejected.len()
    );

    Ok(FrameOutput {
      assignments: outcome.assignments,
      hold_queue: staged.hold_queue,
      suppressed: staged.suppressed,
      unresolved,
      rejected: outcome.rejected,
      bom_state: outcome.bom_state,
      path,
      batches: staged.batches,
      stats: self.stats,
    })
  }

  fn run_tiered(&mut self, frame: &Frame) -> Staged {
    let mut staged = Staged::default();

    let pairs = self.options.prefilter.run(frame, &self.scorer);
    let (pairs, suppressed) = CentroidSuppression::new(self.options.suppression).apply(frame, pairs);
    staged.suppressed = suppressed;

    let router = self.options.router;
    let tiered = router.route(pairs);
    staged.hold(frame, tiered.low, HoldReason::LowConfidence);

    self.accept_high(frame, tiered.high, &mut staged);

    let medium: Vec<Pair> = staged
      .withhold(frame, tiered.medium)
      .into_iter()
      .filter(|p| staged.is_free(p))
      .collect();
    staged.contested.extend(medium.iter().copied());

    for chunk in medium.chunks(self.options.batch_size.max(1)) {
      let batch: Vec<Pair> = chunk.iter().filter(|p| staged.is_free(p)).copied().collect();
      if batch.is_empty() {
        continue;
      }
      self.solve_batch(frame, &batch, &mut staged);
    }

    staged
  }

  fn run_sync(&mut self, frame: &Frame) -> Staged {
    let mut staged = Staged::default();

    let pairs = self.options.prefilter.run(frame, &self.scorer);
    let tiered = self.options.router.route(pairs);
    staged.hold(frame, tiered.low, HoldReason::LowConfidence);

    self.accept_high(frame, tiered.high, &mut staged);

    let medium = staged.withhold(frame, tiered.medium);
    staged.contested.extend(medium.iter().copied());
    let accepted = greedy_assign(
      &medium,
      self.options.confirmation_threshold,
      &mut staged.used_detections,
      &mut staged.used_candidates,
    );
    staged.propose(frame, &accepted, Tier::Medium, AssignmentMethod::Greedy);

    staged
  }

  /// 高置信度对直接接受（按贪心保证唯一性）。
  ///
  /// 裕度不足的对转入待审，其检测在本帧内整体留给人工复核，不会再被
  /// 中置信度阶段分配给较差的候选。
  fn accept_high(&self, frame: &Frame, high: Vec<Pair>, staged: &mut Staged) {
    let (clear, ambiguous) = self.options.router.split_ambiguous(high);

    staged.contested.extend(clear.iter().copied());
    let accepted = greedy_assign(
      &clear,
      self.options.confirmation_threshold,
      &mut staged.used_detections,
      &mut staged.used_candidates,
    );
    staged.propose(frame, &accepted, Tier::High, AssignmentMethod::Greedy);

    // 已被明确接受的检测不再复核
    let ambiguous: Vec<Pair> = ambiguous
      .into_iter()
      .filter(|p| !staged.used_detections.contains(&p.detection_index))
      .collect();
    for pair in &ambiguous {
      staged.deferred.insert(pair.detection_index);
      staged.used_detections.insert(pair.detection_index);
    }
    staged.hold(frame, ambiguous, HoldReason::AmbiguousMargin);
  }

  fn solve_batch(&mut self, frame: &Frame, batch: &[Pair], staged: &mut Staged) {
    let options = &self.options;
    let matrix = CostMatrix::build_with(batch, options.prefilter.threshold, options.sparsity_threshold);

    let started = Instant::now();
    let result = self
      .solver
      .solve(&matrix, options.confirmation_threshold, started + options.timeout)
      .and_then(|matched| {
        let elapsed = started.elapsed();
        if elapsed > options.timeout {
          Err(SolverError::Timeout { elapsed })
        } else {
          Ok(matched)
        }
      });

    let (accepted, method, fallback) = match result {
      Ok(matched) => {
        let by_cell: HashMap<(usize, usize), &Pair> = batch
          .iter()
          .map(|p| ((p.detection_index, p.candidate_index), p))
          .collect();
        let mut accepted = Vec::with_capacity(matched.len());
        for m in matched {
          let Some(&&pair) = by_cell.get(&(m.detection_index, m.candidate_index)) else {
            warn!(
              "求解器返回了批次外的对 ({}, {})，已丢弃",
              m.detection_index, m.candidate_index
            );
            continue;
          };
          if !confirms(pair.similarity, options.confirmation_threshold) || !staged.is_free(&pair) {
            continue;
          }
          staged.used_detections.insert(pair.detection_index);
          staged.used_candidates.insert(pair.candidate_index);
          accepted.push(pair);
        }
        (accepted, self.solver.method(), None)
      }
      Err(e) => {
        let reason = match e {
          SolverError::Timeout { .. } => {
            self.stats.timeout_fallbacks += 1;
            FallbackReason::Timeout
          }
          SolverError::Internal(_) => {
            self.stats.solver_failures += 1;
            FallbackReason::SolverFailure
          }
        };
        warn!("{}，该批次改用贪心匹配", e);
        let accepted = greedy_assign(
          batch,
          options.confirmation_threshold,
          &mut staged.used_detections,
          &mut staged.used_candidates,
        );
        (accepted, AssignmentMethod::Greedy, Some(reason))
      }
    };

    debug!(
      "批次: {} 对, 密度 {:.3}, 方法 {:?}, 匹配 {}",
      batch.len(),
      matrix.density(),
      method,
      accepted.len()
    );
    staged.batches.push(BatchReport {
      pairs: batch.len(),
      density: matrix.density(),
      compressed: matrix.is_sparse(),
      method,
      fallback,
      matched: accepted.len(),
    });
    staged.propose(frame, &accepted, Tier::Medium, method);
  }
}
