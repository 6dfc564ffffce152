use std::collections::HashMap;

use indoc::indoc;
use suzume::{ModuleLoader, Report, Suzume};

fn vm() -> Suzume {
  Suzume::with_io(Box::new(Vec::<u8>::new()))
}

fn output(vm: &Suzume) -> String {
  let bytes = vm.output_as::<Vec<u8>>().expect("test VMs write to a buffer");
  String::from_utf8_lossy(bytes).into_owned()
}

fn run(source: &str) -> String {
  let mut vm = vm();
  if let Err(report) = vm.eval("test", source) {
    panic!("program failed: {report}\noutput so far: {}", output(&vm));
  }
  output(&vm)
}

fn fail(source: &str) -> Report {
  let mut vm = vm();
  match vm.eval("test", source) {
    Ok(()) => panic!("program unexpectedly succeeded; output: {}", output(&vm)),
    Err(report) => report,
  }
}

#[test]
fn arithmetic_and_printing() {
  assert_eq!(run("System.print(1 + 2 * 3)"), "7\n");
  assert_eq!(run("System.print((1 + 2) * 3)"), "9\n");
  assert_eq!(run("System.print(7 % 3)"), "1\n");
  assert_eq!(run("System.print(-(2) + 1)"), "-1\n");
  assert_eq!(run("System.print(10 / 4)"), "2.5\n");
}

#[test]
fn comparison_and_logic() {
  assert_eq!(run("System.print(1 < 2 && 2 <= 2)"), "true\n");
  assert_eq!(run("System.print(1 > 2 || false)"), "false\n");
  assert_eq!(run("System.print(null || \"fallback\")"), "fallback\n");
  assert_eq!(run("System.print(!true)"), "false\n");
  assert_eq!(run("System.print(1 == 1.0)"), "true\n");
  assert_eq!(run("System.print(\"a\" == \"a\")"), "true\n");
}

#[test]
fn ternary_and_bitwise() {
  assert_eq!(run("System.print(1 < 2 ? \"yes\" : \"no\")"), "yes\n");
  assert_eq!(run("System.print(6 & 3)"), "2\n");
  assert_eq!(run("System.print(6 | 3)"), "7\n");
  assert_eq!(run("System.print(1 << 4)"), "16\n");
  assert_eq!(run("System.print(~0)"), "4294967295\n");
}

#[test]
fn fib_by_recursion() {
  let source = indoc! {r#"
    fun fib(n) {
      if (n < 2) { return n }
      return fib(n - 1) + fib(n - 2)
    }
    System.print(fib(10))
  "#};
  assert_eq!(run(source), "55\n");
}

#[test]
fn while_loop_with_break_and_continue() {
  let source = indoc! {r#"
    var total = 0
    var i = 0
    while (true) {
      i = i + 1
      if (i > 100) { break }
      if (i % 2 == 0) { continue }
      total = total + i
    }
    System.print(total)
  "#};
  assert_eq!(run(source), "2500\n");
}

#[test]
fn for_over_range() {
  let source = indoc! {r#"
    var items = []
    for i (1..5) { items.add(i) }
    System.print(items)
  "#};
  assert_eq!(run(source), "[1, 2, 3, 4, 5]\n");
}

#[test]
fn closures_share_one_captured_slot() {
  let source = indoc! {r#"
    fun makePair() {
      var value = 0
      var setter = Fn.new {|x| value = x }
      var getter = Fn.new { return value }
      return [setter, getter]
    }
    var pair = makePair()
    pair[0].call(9)
    System.print(pair[1].call())
  "#};
  assert_eq!(run(source), "9\n");
}

#[test]
fn fiber_ping_pong() {
  let source = indoc! {r#"
    var list = []
    var pong = null
    var ping = Thread.new(Fn.new {
      var i = 1
      while (i <= 5) {
        list.add("A" + i.toString)
        pong.call()
        i = i + 1
      }
    })
    pong = Thread.new(Fn.new {
      var i = 1
      while (i <= 5) {
        list.add("B" + i.toString)
        Thread.yield()
        i = i + 1
      }
    })
    ping.call()
    System.print(list.join(", "))
  "#};
  assert_eq!(run(source), "A1, B1, A2, B2, A3, B3, A4, B4, A5, B5\n");
}

#[test]
fn fiber_call_passes_values_through_yield() {
  let source = indoc! {r#"
    var doubler = Thread.new(Fn.new {
      var value = Thread.yield("ready")
      Thread.yield(value * 2)
    })
    System.print(doubler.call())
    System.print(doubler.call(21))
    System.print(doubler.isDone)
  "#};
  assert_eq!(run(source), "ready\n42\nfalse\n");
}

#[test]
fn inheritance_super_and_is() {
  let source = indoc! {r#"
    class Animal {
      var sound
      new(s) { sound = s }
      speak() { return "generic " + sound }
    }
    class Dog < Animal {
      new() { super("woof") }
      speak() { return "dog says " + super.speak() }
    }
    var dog = Dog.new()
    System.print(dog.speak())
    System.print(dog is Animal)
    System.print(dog is Dog)
    System.print(dog is String)
  "#};
  assert_eq!(run(source), "dog says generic woof\ntrue\ntrue\nfalse\n");
}

#[test]
fn getters_setters_and_static_fields() {
  let source = indoc! {r#"
    class Counter {
      static var created = 0
      var count
      new() {
        count = 0
        created = created + 1
      }
      value { return count }
      value=(v) { count = v }
      static total { return created }
    }
    var a = Counter.new()
    var b = Counter.new()
    a.value = 5
    System.print(a.value)
    System.print(b.value)
    System.print(Counter.total)
  "#};
  assert_eq!(run(source), "5\n0\n2\n");
}

#[test]
fn operator_overloading_and_subscripts() {
  let source = indoc! {r#"
    class Vec {
      var x
      var y
      new(a, b) {
        x = a
        y = b
      }
      +(other) { return Vec.new(x + other.getX, y + other.getY) }
      [i] { return i == 0 ? x : y }
      getX { return x }
      getY { return y }
      toString { return "(" + x.toString + ", " + y.toString + ")" }
    }
    var v = Vec.new(1, 2) + Vec.new(10, 20)
    System.print(v)
    System.print(v[0])
    System.print(v[1])
  "#};
  assert_eq!(run(source), "(11, 22)\n11\n22\n");
}

#[test]
fn map_round_trip_with_tombstone_churn() {
  let source = indoc! {r#"
    var m = Map.new()
    var i = 0
    while (i < 100) {
      m[i] = i * 2
      i = i + 1
    }
    var ok = true
    i = 0
    while (i < 100) {
      if (m[i] != i * 2) { ok = false }
      i = i + 1
    }
    System.print(ok)
    i = 0
    while (i < 50) {
      m.remove(i)
      i = i + 1
    }
    System.print(m.count)
    i = 0
    while (i < 50) {
      m[i] = i * 3
      i = i + 1
    }
    System.print(m.count)
    System.print(m[25])
    System.print(m[75])
    System.print(m.containsKey(99))
  "#};
  assert_eq!(run(source), "true\n50\n100\n75\n150\ntrue\n");
}

#[test]
fn map_literals_and_keys() {
  let source = indoc! {r#"
    var m = {"one": 1, "two": 2}
    System.print(m["one"] + m["two"])
    System.print(m.keys.count)
  "#};
  assert_eq!(run(source), "3\n2\n");
}

#[test]
fn string_interpolation() {
  assert_eq!(run(r#"System.print("sum = %(1 + 2)")"#), "sum = 3\n");
  assert_eq!(
    run(r#"System.print("a %("b %(40 + 2) c") d")"#),
    "a b 42 c d\n"
  );
}

#[test]
fn utf8_strings() {
  let source = indoc! {r#"
    var s = "héllo"
    System.print(s.count)
    var chars = []
    for c (s) { chars.add(c) }
    System.print(chars.count)
    System.print(s[1])
    System.print(chars.join(""))
    System.print(s.contains("llo"))
    System.print(s.indexOf("llo"))
  "#};
  // six bytes, five code points; the subscript returns the whole two-byte
  // sequence at byte offset 1
  assert_eq!(run(source), "6\n5\né\nhéllo\ntrue\n3\n");
}

#[test]
fn string_methods() {
  let source = indoc! {r#"
    System.print("hello".startsWith("he"))
    System.print("hello".endsWith("world"))
    System.print(String.fromCodePoint(0x41))
    System.print("hello"[1..3])
    System.print(Num.fromString("12.5"))
  "#};
  assert_eq!(run(source), "true\nfalse\nA\nell\n12.5\n");
}

#[test]
fn gc_stress_keeps_survivors_and_bounds_memory() {
  let source = indoc! {r#"
    fun makeJunk() {
      var keep = []
      var i = 0
      while (i < 10000) {
        var s = "junk" + i.toString
        if (i % 1000 == 0) { keep.add(s) }
        i = i + 1
      }
      return keep
    }
    var kept = makeJunk()
    System.print(kept.count)
    System.print(kept[9])
  "#};
  let mut vm = vm();
  vm.eval("test", source).expect("program runs");
  assert_eq!(output(&vm), "10\njunk9000\n");
  assert!(vm.collections() >= 1, "the stress loop must trigger the collector");
  assert!(
    vm.allocated_bytes() < 4 << 20,
    "live bytes stay proportional to survivors, got {}",
    vm.allocated_bytes()
  );
}

#[test]
fn imports_through_a_custom_loader() {
  struct MapLoader(HashMap<String, String>);
  impl ModuleLoader for MapLoader {
    fn load(&self, name: &str) -> Result<String, Report> {
      self
        .0
        .get(name)
        .cloned()
        .ok_or_else(|| Report::io(format!("could not open module \"{name}\"")))
    }
  }

  let helper = indoc! {r#"
    var greeting = "hello from helper"
    fun shout(text) { return text + "!" }
    System.print("helper loaded")
  "#};
  let source = indoc! {r#"
    import helper for greeting
    System.print(greeting)
  "#};

  let mut vm = vm();
  let modules = HashMap::from([("helper".to_string(), helper.to_string())]);
  vm.set_loader(Box::new(MapLoader(modules)));
  vm.eval("test", source).expect("program runs");
  assert_eq!(output(&vm), "helper loaded\nhello from helper\n");
}

#[test]
fn runtime_errors_surface_with_category() {
  let report = fail("System.print(1 + \"x\")");
  assert_eq!(report.category, suzume::Category::Runtime);
  assert!(report.message.contains("number"));

  let report = fail("var m = [].frobnicate");
  assert_eq!(report.category, suzume::Category::Runtime);
  assert!(report.message.contains("frobnicate"));

  let report = fail(indoc! {r#"
    var t = Thread.new(Fn.new { Thread.abort("boom") })
    t.call()
  "#});
  assert_eq!(report.category, suzume::Category::Runtime);
  assert!(report.message.contains("boom"));
}

#[test]
fn calling_a_finished_fiber_errors() {
  let report = fail(indoc! {r#"
    var t = Thread.new(Fn.new { return 1 })
    t.call()
    t.call()
  "#});
  assert_eq!(report.category, suzume::Category::Runtime);
  assert!(report.message.contains("finished"));
}

#[test]
fn compile_errors_carry_module_and_line() {
  let report = fail("var a = 1\nvar a = 2");
  assert_eq!(report.category, suzume::Category::Compile);
  assert_eq!(report.module.as_deref(), Some("test"));
  assert_eq!(report.line, Some(2));
  assert!(report.message.contains("redefinition"));

  let report = fail("break");
  assert_eq!(report.category, suzume::Category::Compile);

  let report = fail("System.print(missing)");
  assert_eq!(report.category, suzume::Category::Compile);
  assert!(report.message.contains("never defined"));
}

#[test]
fn fn_call_arity_is_checked() {
  let report = fail(indoc! {r#"
    fun two(a, b) { return a + b }
    System.print(two(1))
  "#});
  assert_eq!(report.category, suzume::Category::Runtime);
  assert!(report.message.contains("arguments"));
}

#[test]
fn suspend_ends_execution_quietly() {
  let source = indoc! {r#"
    System.print("before")
    Thread.suspend()
    System.print("after")
  "#};
  assert_eq!(run(source), "before\n");
}

#[test]
fn module_state_persists_between_evals() {
  let mut vm = vm();
  vm.eval("repl", "var counter = 1").expect("first line runs");
  vm.eval("repl", "counter = counter + 1").expect("second line runs");
  vm.eval("repl", "System.print(counter)").expect("third line runs");
  assert_eq!(output(&vm), "2\n");
}

#[test]
fn disassembly_of_a_simple_module() {
  let mut vm = vm();
  let listing = vm.disassemble("test", "var a = 1").expect("module compiles");
  insta::assert_snapshot!(listing, @r###"
  -- <module> --
  0000 LoadConstant 0 ; 1
  0003 StoreModuleVar 14
  0006 Pop
  0007 PushNull
  0008 Return
  0009 End
  "###);
}
