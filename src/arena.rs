// 该文件是 Larder （灶间） 项目的一部分。
// src/arena.rs - 帧作用域缓冲区管理
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

//! # 帧作用域
//!
//! 每一次循环迭代打开一个 [`FrameScope`]，迭代内分配的所有数值缓冲区
//! （输入张量、模型输出）都通过 [`FrameScope::track`] 登记，得到一个
//! [`Tracked`] 句柄。句柄被丢弃时缓冲区即被释放并从账本中注销。
//!
//! 缓冲区总是在作用域之后声明，因此无论迭代成功、提前返回还是出错，
//! 它们都会先于作用域被丢弃。作用域结束时如果账本上仍有本作用域登记的
//! 缓冲区，说明有缓冲区逃逸出了迭代，会记录错误日志。

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tracing::{debug, error};

#[derive(Debug, Default)]
struct LedgerCounters {
  live: AtomicUsize,
  allocated: AtomicU64,
  released: AtomicU64,
}

/// 缓冲区账本，记录当前存活、累计分配与累计释放的缓冲区数量
#[derive(Debug, Clone, Default)]
pub struct BufferLedger {
  counters: Arc<LedgerCounters>,
}

impl BufferLedger {
  pub fn new() -> Self {
    Self::default()
  }

  /// 当前尚未释放的缓冲区数量
  pub fn live(&self) -> usize {
    self.counters.live.load(Ordering::Acquire)
  }

  pub fn allocated(&self) -> u64 {
    self.counters.allocated.load(Ordering::Acquire)
  }

  pub fn released(&self) -> u64 {
    self.counters.released.load(Ordering::Acquire)
  }

  /// 为第 `frame` 帧打开一个新的作用域
  pub fn scope(&self, frame: u64) -> FrameScope {
    FrameScope {
      counters: self.counters.clone(),
      frame,
      issued: AtomicUsize::new(0),
      released: Arc::new(AtomicUsize::new(0)),
    }
  }
}

/// 单次迭代的缓冲区作用域
#[derive(Debug)]
pub struct FrameScope {
  counters: Arc<LedgerCounters>,
  frame: u64,
  issued: AtomicUsize,
  // 只统计本作用域登记的缓冲区，其他帧的释放不计入
  released: Arc<AtomicUsize>,
}

impl FrameScope {
  pub fn frame(&self) -> u64 {
    self.frame
  }

  /// 本作用域内登记过的缓冲区数量
  pub fn issued(&self) -> usize {
    self.issued.load(Ordering::Acquire)
  }

  /// 本作用域登记且尚未释放的缓冲区数量
  pub fn outstanding(&self) -> usize {
    self
      .issued()
      .saturating_sub(self.released.load(Ordering::Acquire))
  }

  /// 登记一个缓冲区，返回的句柄被丢弃时缓冲区随之释放
  pub fn track<T>(&self, value: T) -> Tracked<T> {
    self.counters.live.fetch_add(1, Ordering::AcqRel);
    self.counters.allocated.fetch_add(1, Ordering::AcqRel);
    self.issued.fetch_add(1, Ordering::AcqRel);
    Tracked {
      value,
      _lease: BufferLease {
        counters: self.counters.clone(),
        scope_released: self.released.clone(),
      },
    }
  }
}

impl Drop for FrameScope {
  fn drop(&mut self) {
    let outstanding = self.outstanding();
    if outstanding > 0 {
      error!(
        "第 {} 帧作用域结束时仍有 {} 个缓冲区未释放",
        self.frame, outstanding
      );
    } else {
      debug!("第 {} 帧作用域结束，释放 {} 个缓冲区", self.frame, self.issued());
    }
  }
}

/// 账本上的一条登记，丢弃时注销
#[derive(Debug)]
pub struct BufferLease {
  counters: Arc<LedgerCounters>,
  scope_released: Arc<AtomicUsize>,
}

impl Drop for BufferLease {
  fn drop(&mut self) {
    self.counters.live.fetch_sub(1, Ordering::AcqRel);
    self.counters.released.fetch_add(1, Ordering::AcqRel);
    self.scope_released.fetch_add(1, Ordering::AcqRel);
  }
}

/// 已登记的缓冲区
#[derive(Debug)]
pub struct Tracked<T> {
  value: T,
  _lease: BufferLease,
}

impl<T> Deref for Tracked<T> {
  type Target = T;

  fn deref(&self) -> &T {
    &self.value
  }
}

impl<T> AsRef<T> for Tracked<T> {
  fn as_ref(&self) -> &T {
    &self.value
  }
}
