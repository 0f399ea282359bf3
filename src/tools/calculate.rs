//! calculate：算术表达式求值
//!
//! 递归下降解析，只认数字、运算符 + - * / % ^、括号、常量 pi / e 与少量数学函数；
//! 不执行任何其它代码。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::tools::registry::ToolResult;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

/// 表达式最大长度（字节）
const MAX_EXPRESSION_LEN: usize = 4096;
/// 括号、一元运算与函数调用的最大嵌套层数
const MAX_DEPTH: usize = 64;

/// 求值：成功返回有限数值
pub fn evaluate(expression: &str) -> Result<f64, String> {
    if expression.trim().is_empty() {
        return Err("Empty expression".to_string());
    }
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(format!("Expression is longer than {MAX_EXPRESSION_LEN} bytes"));
    }
    let mut parser = Parser {
        chars: expression.chars().collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(c) = parser.peek() {
        return Err(format!("Unexpected '{c}' at position {}", parser.pos));
    }
    if !value.is_finite() {
        return Err("Result is not a finite number".to_string());
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    /// 跳过空白后的下一个字符
    fn peek(&mut self) -> Option<char> {
        while matches!(self.raw(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
        self.raw()
    }

    /// 进入一层嵌套；超过上限直接报错，递归深度因此有界
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, String>) -> Result<T, String> {
        if self.depth >= MAX_DEPTH {
            return Err("Expression is nested too deeply".to_string());
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn raw(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, String> {
        let mut acc = self.term()?;
        loop {
            if self.eat('+') {
                acc += self.term()?;
            } else if self.eat('-') {
                acc -= self.term()?;
            } else {
                return Ok(acc);
            }
        }
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<f64, String> {
        let mut acc = self.unary()?;
        loop {
            if self.eat('*') {
                acc *= self.unary()?;
            } else if self.eat('/') {
                let rhs = self.unary()?;
                if rhs == 0.0 {
                    return Err("Division by zero".to_string());
                }
                acc /= rhs;
            } else if self.eat('%') {
                let rhs = self.unary()?;
                if rhs == 0.0 {
                    return Err("Modulo by zero".to_string());
                }
                acc %= rhs;
            } else {
                return Ok(acc);
            }
        }
    }

    // unary := ('-' | '+') unary | power
    fn unary(&mut self) -> Result<f64, String> {
        if self.eat('-') {
            return Ok(-self.nested(Self::unary)?);
        }
        if self.eat('+') {
            return self.nested(Self::unary);
        }
        self.power()
    }

    // power := atom ('^' unary)?   右结合
    fn power(&mut self) -> Result<f64, String> {
        let base = self.atom()?;
        if self.eat('^') || self.eat_str("**") {
            let exp = self.nested(Self::unary)?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    fn eat_str(&mut self, s: &str) -> bool {
        self.peek();
        let n = s.chars().count();
        let matches = self
            .chars
            .get(self.pos..self.pos + n)
            .map(|slice| slice.iter().copied().eq(s.chars()))
            .unwrap_or(false);
        if matches {
            self.pos += n;
        }
        matches
    }

    fn atom(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let v = self.nested(Self::expr)?;
                if !self.eat(')') {
                    return Err("Missing closing parenthesis".to_string());
                }
                Ok(v)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.identifier(),
            Some(c) => Err(format!("Unexpected '{c}' at position {}", self.pos)),
            None => Err("Unexpected end of expression".to_string()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while matches!(self.raw(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>().map_err(|_| format!("Invalid number '{text}'"))
    }

    fn identifier(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while matches!(self.raw(), Some(c) if c.is_ascii_alphanumeric()) {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect::<String>().to_lowercase();
        match name.as_str() {
            "pi" => return Ok(std::f64::consts::PI),
            "e" => return Ok(std::f64::consts::E),
            _ => {}
        }
        if !self.eat('(') {
            return Err(format!("Unknown identifier '{name}'"));
        }
        let arg = self.nested(Self::expr)?;
        if !self.eat(')') {
            return Err(format!("Missing ')' after {name}("));
        }
        let v = match name.as_str() {
            "sqrt" if arg < 0.0 => return Err("sqrt of a negative number".to_string()),
            "sqrt" => arg.sqrt(),
            "abs" => arg.abs(),
            "sin" => arg.sin(),
            "cos" => arg.cos(),
            "tan" => arg.tan(),
            "ln" => arg.ln(),
            "log" | "log10" => arg.log10(),
            "exp" => arg.exp(),
            "floor" => arg.floor(),
            "ceil" => arg.ceil(),
            "round" => arg.round(),
            _ => return Err(format!("Unknown function '{name}'")),
        };
        Ok(v)
    }
}

#[derive(Deserialize, JsonSchema)]
struct CalculateArgs {
    /// Math expression, e.g. "2 + 2", "sqrt(16)", "(3 ^ 2) % 4"
    expression: String,
}

pub struct CalculateTool;

#[async_trait]
impl Tool for CalculateTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Evaluate a math expression. Supports + - * / % ^, parentheses, pi, e and sqrt/abs/sin/cos/tan/ln/log/exp/floor/ceil/round."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<CalculateArgs>()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: CalculateArgs = parse_args(args)?;
        let result = evaluate(&args.expression).map_err(ToolError::execution)?;
        Ok(json!({ "expression": args.expression, "result": result }))
    }
}
