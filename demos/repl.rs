use parenlang::{BindingMode, Session, Token, TokenKind};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;

fn main() {
    env_logger::init();

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

fn run_repl() {
    println!("parenlang tree-rewriting evaluator");
    println!("Enter forms like: (: sq (lambda (list x) (* x x))) (sq 7)");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let mut session = Session::new();
    let mut show_tokens = false;

    loop {
        match rl.readline("paren> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(&session);
                        continue;
                    }
                    ":eager" => {
                        let mode = match session.binding_mode() {
                            BindingMode::Deferred => BindingMode::Eager,
                            BindingMode::Eager => BindingMode::Deferred,
                        };
                        session.set_binding_mode(mode);
                        println!("Binding mode: {mode:?}");
                        continue;
                    }
                    ":tokens" => {
                        show_tokens = !show_tokens;
                        println!("Token echo {}", if show_tokens { "on" } else { "off" });
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                if show_tokens {
                    print_tokens(&session.tokens(line));
                }

                match session.eval_str(line) {
                    Ok(result) => println!("{result}"),
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_tokens(tokens: &[Token]) {
    for token in tokens {
        if token.kind == TokenKind::Eof {
            continue;
        }
        println!("  {:>4}  {:<12} {:?}", token.offset, format!("{:?}", token.kind), token.text);
    }
}

fn print_help() {
    println!("Commands:");
    println!("  :help    - Show this help message");
    println!("  :env     - Show current bindings");
    println!("  :eager   - Toggle between deferred and eager assignment");
    println!("  :tokens  - Toggle echoing the token stream of each input");
    println!("  :quit    - Exit the interpreter");
    println!("  Ctrl+C   - Exit the interpreter");
    println!();
    println!("Forms:");
    println!("  (: name expr)               assign");
    println!("  (lambda (list p ...) body)  build a closure");
    println!("  (f arg ...)                 apply a closure");
    println!("  (cmp cond then else)        then-branch when cond is 1");
    println!("  (list a ...)                evaluate each element");
    println!("  (lazy expr)                 evaluate with eager assignment");
    println!("  (eval \"source\")             evaluate source text");
    println!("  (print a ...)               write values on one line");
    println!("  (time)                      seconds since the Unix epoch");
    println!("  + - * / %  & | ^  = < > >= <=");
    println!();
}

fn print_environment(session: &Session) {
    let bindings = session.bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!(
        "Bindings ({} total, {:?} mode):",
        bindings.len(),
        session.binding_mode()
    );
    for (name, value) in bindings {
        println!("  {name} = {value}");
    }
}
