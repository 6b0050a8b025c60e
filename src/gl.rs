// 该文件是 Qianli （千里眼） 项目的一部分。
// src/gl.rs - 图形上下文能力
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

//! # 图形上下文
//!
//! 纹理读回只能在当前绑定了图形上下文的线程上执行。宿主应用在渲染线程上
//! 通过 [`make_current`] 登记自己的 GL 函数表，守卫在作用域结束时恢复之前的
//! 上下文。上下文按线程保存，不会跨线程可见。
//!
//! ```no_run
//! use std::rc::Rc;
//! use qianli::gl::{self, GlFunctions};
//!
//! # fn demo(functions: Rc<dyn GlFunctions>) {
//! let _current = gl::make_current(functions);
//! assert!(gl::has_current());
//! # }
//! ```

use std::{cell::RefCell, marker::PhantomData, rc::Rc};

/// 读回所需的最小 GL 函数集合
pub trait GlFunctions {
  fn gen_framebuffer(&self) -> u32;
  fn delete_framebuffer(&self, framebuffer: u32);
  /// 查询 `GL_FRAMEBUFFER_BINDING`
  fn framebuffer_binding(&self) -> u32;
  fn bind_framebuffer(&self, framebuffer: u32);
  /// 将 2D 纹理挂载到 `GL_COLOR_ATTACHMENT0`
  fn attach_color_texture(&self, texture: u32);
  /// 以 `GL_RGBA` / `GL_UNSIGNED_BYTE` 读回像素，`dst` 长度为 `width * height * 4`
  fn read_pixels(&self, width: u32, height: u32, dst: &mut [u8]);
}

thread_local! {
  static CURRENT: RefCell<Option<Rc<dyn GlFunctions>>> = const { RefCell::new(None) };
}

/// 当前上下文守卫，释放时恢复之前的上下文
pub struct CurrentContext {
  previous: Option<Rc<dyn GlFunctions>>,
  _not_send: PhantomData<*const ()>,
}

impl Drop for CurrentContext {
  fn drop(&mut self) {
    let previous = self.previous.take();
    CURRENT.with(|current| *current.borrow_mut() = previous);
  }
}

/// 将 `functions` 设为当前线程的图形上下文
pub fn make_current(functions: Rc<dyn GlFunctions>) -> CurrentContext {
  let previous = CURRENT.with(|current| current.borrow_mut().replace(functions));
  CurrentContext {
    previous,
    _not_send: PhantomData,
  }
}

pub fn has_current() -> bool {
  CURRENT.with(|current| current.borrow().is_some())
}

/// 在当前线程的图形上下文上执行 `f`，没有上下文时返回 `None`
pub fn with_current<R>(f: impl FnOnce(&dyn GlFunctions) -> R) -> Option<R> {
  let functions = CURRENT.with(|current| current.borrow().clone())?;
  Some(f(functions.as_ref()))
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Dummy;

  impl GlFunctions for Dummy {
    fn gen_framebuffer(&self) -> u32 {
      1
    }
    fn delete_framebuffer(&self, _framebuffer: u32) {}
    fn framebuffer_binding(&self) -> u32 {
      0
    }
    fn bind_framebuffer(&self, _framebuffer: u32) {}
    fn attach_color_texture(&self, _texture: u32) {}
    fn read_pixels(&self, _width: u32, _height: u32, _dst: &mut [u8]) {}
  }

  #[test]
  fn guard_restores_previous_context() {
    assert!(!has_current());
    {
      let _outer = make_current(Rc::new(Dummy));
      assert!(has_current());
      {
        let _inner = make_current(Rc::new(Dummy));
        assert!(has_current());
      }
      assert!(has_current());
    }
    assert!(!has_current());
  }

  #[test]
  fn context_is_not_visible_from_other_threads() {
    let _current = make_current(Rc::new(Dummy));
    let seen = std::thread::spawn(has_current).join().unwrap_or(true);
    assert!(!seen);
  }
}
